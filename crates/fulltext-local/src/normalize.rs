//! Text normaliser (component C5): a pure, deterministic function library.
//!
//! `fix_unicode` and `process_text`/`normalize_text_psv` are carried over
//! from the source's `process/psv.py` algorithm exactly — this is the kind
//! of exact-constant detail the spec explicitly defers to the original
//! implementation for.

use regex::Regex;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

macro_rules! static_re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pat).expect("static pattern"))
        }
    };
}

static_re!(re_combining_mark, r"[\u{a8}\u{b4}\u{b8}\u{b0}]\n?");
static_re!(re_circumflex_mark, r"[\u{5e}\u{60}\u{7e}]\n");
static_re!(re_line_split, r"[\x0a-\x0d]+");
static_re!(re_references_boundary, r"(?i)^[^a-zA-Z]*(references|bibliography)[\W]*$");
static_re!(re_symbols, r"[^.\w ]");
static_re!(re_number_fraction, r"\d+\.?\d+/");
static_re!(re_digit, r"\d");
static_re!(re_abbrev3, r"\s\w\.\w\.\w\.\s");
static_re!(re_abbrev2, r"\s\w\.\w\.\s");
static_re!(re_abbrev1, r"\s\w\.\s");
static_re!(re_single_word, r"\s[a-zA-Z]\s");
static_re!(re_single_dot, r"\s[a-zA-Z]\.");
static_re!(re_extra_spaces, r"\s+");
static_re!(re_word, r"\w");
static_re!(re_nonword, r"\W");
static_re!(re_fig, r"(?i)figs?\.?\s");
static_re!(re_eq, r"(?i)eqs?\.?\s");
static_re!(re_sect, r"(?i)sects?\.?\s");
static_re!(re_ref, r"(?i)refs?\.?\s");
static_re!(re_prof, r"(?i)prof\.");
static_re!(re_dr, r"(?i)dr\.");

/// Recovers accented characters mangled by some PDF-to-text pipelines:
/// combining diacritics (optionally followed by a line feed), a
/// circumflex/grave/tilde mandatorily followed by a line feed, and four
/// fixed Latin-1 substitutions.
fn recover_accents(text: &str) -> String {
    let s = re_combining_mark().replace_all(text, "");
    let s = re_circumflex_mark().replace_all(&s, "");
    s.replace('\u{f8}', "o")
        .replace('\u{d8}', "O")
        .replace('\u{df}', "ss")
        .replace('\u{e6}', "ae")
        .replace('\u{c6}', "AE")
}

/// Strips known-bad byte sequences and applies NFKC normalisation.
pub fn fix_unicode(text: &str) -> String {
    recover_accents(text).nfkc().collect()
}

fn split_lines(text: &str) -> Vec<String> {
    re_line_split()
        .split(text)
        .map(|s| format!("{s}\n"))
        .collect()
}

/// Finds the last line matching the references/bibliography boundary and
/// splits there, unless the resulting references section would exceed 50%
/// of all lines (in which case the split is suppressed entirely).
fn split_on_references(lines: Vec<String>) -> (Vec<String>, Vec<String>) {
    let line_num = lines.len().max(1);
    let mut last_refs: Option<usize> = None;
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_end_matches('\n');
        if re_references_boundary().is_match(trimmed) {
            last_refs = Some(i);
        }
    }
    match last_refs {
        None => (lines, Vec::new()),
        Some(idx) => {
            let refs_fraction = 1.0 - (idx as f64 / line_num as f64);
            if refs_fraction > 0.5 {
                (lines, Vec::new())
            } else {
                let body = lines[..idx].to_vec();
                let refs = lines[idx..].to_vec();
                (body, refs)
            }
        }
    }
}

fn remove_keyword(lines: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut prev_all_digits = false;
    for line in lines {
        let lower = line.to_lowercase();
        let trimmed = line.trim();
        let is_all_digits = !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit());
        let drop = lower.trim_start().starts_with("arxiv")
            || lower.contains("will be inserted by hand later")
            || lower.contains("was prepared with the aas")
            || (prev_all_digits && (lower.contains("university") || lower.contains("institute")));
        if !drop {
            out.push(line);
        }
        prev_all_digits = is_all_digits;
    }
    out
}

fn remove_whitespace(line: &str) -> String {
    line.chars()
        .map(|c| {
            if c == '\n' || c == '\r' || c == '\x0c' || c == '\t' {
                ' '
            } else {
                c
            }
        })
        .collect()
}

/// Joins hyphenated line continuations (`- ` at end of line) and false line
/// breaks (a continuation beginning lowercase, when the previous line did
/// not end a sentence with `. `).
fn remove_bad_eol(lines: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    for line in lines {
        if let Some(prev) = out.last_mut() {
            if prev.ends_with("- ") || prev.ends_with("-\n") {
                let trimmed_prev = prev.trim_end_matches(['-', ' ', '\n']).to_string();
                *prev = format!("{trimmed_prev}{line}");
                continue;
            }
            let starts_lower = line
                .trim_start()
                .chars()
                .next()
                .map(|c| c.is_lowercase())
                .unwrap_or(false);
            let prev_ends_sentence = prev.trim_end().ends_with('.');
            if starts_lower && !prev_ends_sentence {
                let merged = format!("{} {}", prev.trim_end(), line.trim_start());
                *prev = merged;
                continue;
            }
        }
        out.push(line);
    }
    out
}

fn expand_words(line: &str) -> String {
    let s = re_fig().replace_all(line, "Figure ").to_string();
    let s = re_eq().replace_all(&s, "Equation ").to_string();
    let s = re_sect().replace_all(&s, "Section ").to_string();
    let s = re_ref().replace_all(&s, "Reference ").to_string();
    let s = re_prof().replace_all(&s, "Prof").to_string();
    re_dr().replace_all(&s, "Dr").to_string()
}

fn remove_symbols(line: &str) -> String {
    re_symbols().replace_all(line, " ").replace('_', " ")
}

fn remove_numbers(line: &str) -> String {
    let s = re_number_fraction().replace_all(line, " ").to_string();
    re_digit().replace_all(&s, " ").to_string()
}

fn remove_abbrev(line: &str) -> String {
    let s = re_abbrev3().replace_all(line, " ").to_string();
    let s = re_abbrev2().replace_all(&s, " ").to_string();
    re_abbrev1().replace_all(&s, " ").to_string()
}

fn remove_single_alphabet(line: &str) -> String {
    let s = re_single_word().replace_all(line, " ").to_string();
    let s = re_single_word().replace_all(&s, " ").to_string();
    re_single_dot().replace_all(&s, ".").to_string()
}

fn remove_extra_spaces(line: &str) -> String {
    re_extra_spaces()
        .replace_all(line, " ")
        .trim_start()
        .to_string()
}

fn split_sentence(lines: Vec<String>) -> Vec<String> {
    lines
        .iter()
        .flat_map(|l| l.split(". ").map(|s| s.to_string()))
        .collect()
}

fn clean_sentence(sentences: Vec<String>) -> Vec<String> {
    sentences
        .into_iter()
        .filter_map(|s| {
            if !re_word().is_match(&s) {
                return None;
            }
            let s = re_nonword().replace_all(&s, " ").to_string();
            let cleaned = re_extra_spaces().replace_all(&s, " ").trim().to_string();
            if cleaned.chars().count() <= 3 {
                return None;
            }
            Some(cleaned.to_lowercase())
        })
        .collect()
}

fn tidy_txt_from_pdf(lines: Vec<String>) -> Vec<String> {
    let lines = remove_keyword(lines);
    let lines: Vec<String> = lines.iter().map(|l| remove_whitespace(l)).collect();
    let lines = remove_bad_eol(lines);
    let lines: Vec<String> = lines
        .iter()
        .map(|l| {
            let l = expand_words(l);
            let l = remove_symbols(&l);
            let l = remove_numbers(&l);
            let l = remove_abbrev(&l);
            let l = remove_single_alphabet(&l);
            remove_extra_spaces(&l)
        })
        .collect();
    let lines: Vec<String> = lines.iter().map(|l| remove_whitespace(l)).collect();
    let lines = remove_bad_eol(lines);
    let sentences = split_sentence(lines);
    clean_sentence(sentences)
}

/// Produces the `(body, refs)` pair described in §4.4: the references
/// section is located and split off (or the split is suppressed if it
/// would claim more than half the document), then each half is tidied
/// independently.
pub fn process_text(text: &str) -> (String, String) {
    let recovered = recover_accents(text);
    let lines = split_lines(&recovered);
    let (body_lines, refs_lines) = split_on_references(lines);
    let body = tidy_txt_from_pdf(body_lines).join("\n");
    let refs = tidy_txt_from_pdf(refs_lines).join("\n");
    (body, refs)
}

/// The PSV (Perl-Script-Vector) normaliser: one clean lowercase sentence
/// per line, joined with spaces instead of newlines. Discards the
/// references half.
pub fn normalize_text_psv(text: &str) -> String {
    let (body, _refs) = process_text(text);
    body.replace('\n', " ")
}
