//! Prompt construction and answer parsing for priority classification

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{EmailRecord, Label, MessageId};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("valid regex")
});
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("valid regex"));
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").expect("valid regex"));
static ACCOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{8,}\b").expect("valid regex"));
static ANSWER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^\s*(\d+)\s*[,:]\s*(IMPORTANT|NOT IMPORTANT|HIGH|LOW)\s*$")
        .expect("valid regex")
});

const SENDER_MAX: usize = 100;
const SUBJECT_MAX: usize = 150;
const SNIPPET_MAX: usize = 200;

/// One message as shown to the classifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifyRow {
    pub id: MessageId,
    pub sender: String,
    pub subject: String,
    pub snippet: String,
}

impl ClassifyRow {
    /// Anonymized, truncated view of a stored record
    pub fn from_record(record: &EmailRecord) -> Self {
        let clean = |value: Option<&str>, fallback: &str, max: usize| {
            truncate_chars(&anonymize(value.unwrap_or(fallback)), max)
        };
        Self {
            id: record.id.clone(),
            sender: clean(record.sender.as_deref(), "Unknown sender", SENDER_MAX),
            subject: clean(record.subject.as_deref(), "No subject", SUBJECT_MAX),
            snippet: clean(record.snippet.as_deref(), "No content", SNIPPET_MAX),
        }
    }
}

/// Replace addresses, links, phone and account numbers with placeholders
pub fn anonymize(text: &str) -> String {
    let text = EMAIL_RE.replace_all(text, "[EMAIL]");
    let text = URL_RE.replace_all(&text, "[URL]");
    let text = PHONE_RE.replace_all(&text, "[PHONE]");
    ACCOUNT_RE.replace_all(&text, "[ACCOUNT_NUM]").into_owned()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Numbered prompt asking for one `number,HIGH|LOW` line per row
///
/// `tag` is woven into the header and footer; changing it between attempts
/// gives the model a slightly different prompt.
pub fn build_prompt(rows: &[ClassifyRow], tag: &str) -> String {
    let mut prompt = format!(
        "Task: Email Priority Analysis {tag}\n\
         \n\
         Analyze these email metadata samples and determine priority level:\n\
         - HIGH: Work deadlines, personal urgent matters, financial/security alerts, meeting invites\n\
         - LOW: Marketing content, newsletters, social updates, automated notices\n\
         \n\
         Output format: number,priority_level\n\
         Use only HIGH or LOW as priority_level values.\n\
         \n\
         Data samples:\n"
    );
    for (i, row) in rows.iter().enumerate() {
        prompt.push_str(&format!(
            "\n{}. From: {} | Subject: {} | Content: {}",
            i + 1,
            row.sender,
            row.subject,
            row.snippet
        ));
    }
    prompt.push_str(&format!("\n\nAnalysis {tag}:"));
    prompt
}

/// Parse `number,label` lines into 0-based row indices
///
/// Numbers are 1-based in the answer. Lines that do not match and numbers
/// outside `1..=rows` are ignored; a later line for the same number wins.
pub fn parse_classifications(answer: &str, rows: usize) -> Vec<(usize, Label)> {
    let mut parsed: Vec<(usize, Label)> = Vec::new();
    for caps in ANSWER_RE.captures_iter(answer) {
        let Ok(number) = caps[1].parse::<usize>() else {
            continue;
        };
        let Ok(label) = caps[2].parse::<Label>() else {
            continue;
        };
        if number == 0 || number > rows {
            log::debug!("[CLASSIFY] Answer index {} out of range", number);
            continue;
        }
        let index = number - 1;
        match parsed.iter_mut().find(|(i, _)| *i == index) {
            Some(entry) => entry.1 = label,
            None => parsed.push((index, label)),
        }
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str) -> ClassifyRow {
        ClassifyRow {
            id: MessageId::new(id),
            sender: "Shop".into(),
            subject: "Sale".into(),
            snippet: "Half off".into(),
        }
    }

    #[test]
    fn test_anonymize() {
        let out = anonymize(
            "Mail bob@example.com, see https://x.io/a?b=1 call 555-123-4567 acct 123456789",
        );
        assert_eq!(out, "Mail [EMAIL], see [URL] call [PHONE] acct [ACCOUNT_NUM]");
    }

    #[test]
    fn test_row_from_record_truncates_and_defaults() {
        let record = EmailRecord::new("m1").with_subject("x".repeat(400));
        let row = ClassifyRow::from_record(&record);
        assert_eq!(row.sender, "Unknown sender");
        assert_eq!(row.subject.chars().count(), 150);
        assert_eq!(row.snippet, "No content");
    }

    #[test]
    fn test_build_prompt_numbers_rows() {
        let prompt = build_prompt(&[row("a"), row("b")], "_batch_7");
        assert!(prompt.starts_with("Task: Email Priority Analysis _batch_7"));
        assert!(prompt.contains("\n1. From: Shop | Subject: Sale | Content: Half off"));
        assert!(prompt.contains("\n2. From: Shop"));
        assert!(prompt.ends_with("Analysis _batch_7:"));
    }

    #[test]
    fn test_parse_accepts_both_vocabularies() {
        let answer = "1,HIGH\n2: low\n 3 , NOT IMPORTANT \n4,important\nnoise\n";
        let parsed = parse_classifications(answer, 4);
        assert_eq!(
            parsed,
            vec![
                (0, Label::Important),
                (1, Label::NotImportant),
                (2, Label::NotImportant),
                (3, Label::Important),
            ]
        );
    }

    #[test]
    fn test_parse_ignores_out_of_range_and_garbage() {
        let parsed = parse_classifications("0,HIGH\n3,LOW\n2,MAYBE\n1 HIGH\n", 2);
        assert!(parsed.is_empty());
        assert!(parse_classifications("", 5).is_empty());
    }
}
