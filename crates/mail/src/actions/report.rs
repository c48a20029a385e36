//! Unsubscribe report

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::io::Write;

use crate::storage::{RecordStore, UnsubscribeLink};

/// Records with an unsubscribe link, ordered by sender
pub fn unsubscribe_report(store: &dyn RecordStore) -> Result<Vec<UnsubscribeLink>> {
    store
        .list_unsubscribe_links()
        .context("Failed to load unsubscribe links")
}

/// Numbered plain-text listing for the terminal
pub fn render_unsubscribe_report(links: &[UnsubscribeLink]) -> String {
    if links.is_empty() {
        return "No emails with unsubscribe links found.\n".to_string();
    }

    let mut out = format!("--- Unsubscribe Links ({}) ---\n", links.len());
    for (i, link) in links.iter().enumerate() {
        let _ = writeln!(out, "{}. From: {}", i + 1, link.sender.as_deref().unwrap_or("(unknown)"));
        let _ = writeln!(out, "   Subject: {}", link.subject.as_deref().unwrap_or("(no subject)"));
        let _ = writeln!(out, "   Link: {}\n", link.url);
    }
    out.push_str("--- End of Links ---\n");
    out
}

/// Write the report as CSV with a `Sender,Subject,Unsubscribe Link` header
pub fn write_unsubscribe_csv(links: &[UnsubscribeLink], mut out: impl Write) -> Result<()> {
    writeln!(out, "Sender,Subject,Unsubscribe Link")?;
    for link in links {
        writeln!(
            out,
            "{},{},{}",
            csv_field(link.sender.as_deref().unwrap_or_default()),
            csv_field(link.subject.as_deref().unwrap_or_default()),
            csv_field(&link.url)
        )?;
    }
    out.flush()?;
    Ok(())
}

/// Quote a field when it contains a separator, quote or line break
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageId;

    fn link(sender: Option<&str>, url: &str) -> UnsubscribeLink {
        UnsubscribeLink {
            id: MessageId::new("m1"),
            sender: sender.map(str::to_string),
            subject: Some("Deals".to_string()),
            url: url.to_string(),
        }
    }

    #[test]
    fn test_render_lists_every_link() {
        let text = render_unsubscribe_report(&[
            link(Some("Shop <shop@example.com>"), "https://shop.example.com/u"),
            link(None, "https://other.example.com/u"),
        ]);
        assert!(text.starts_with("--- Unsubscribe Links (2) ---"));
        assert!(text.contains("1. From: Shop <shop@example.com>"));
        assert!(text.contains("2. From: (unknown)"));
        assert!(text.contains("   Link: https://other.example.com/u"));
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(
            render_unsubscribe_report(&[]),
            "No emails with unsubscribe links found.\n"
        );
    }

    #[test]
    fn test_csv_quotes_fields() {
        let mut buf = Vec::new();
        write_unsubscribe_csv(
            &[link(Some("\"Shop, Inc\" <s@example.com>"), "https://e.com/u?a=1,2")],
            &mut buf,
        )
        .unwrap();
        let csv = String::from_utf8(buf).unwrap();
        assert_eq!(
            csv,
            "Sender,Subject,Unsubscribe Link\n\"\"\"Shop, Inc\"\" <s@example.com>\",Deals,\"https://e.com/u?a=1,2\"\n"
        );
    }
}
