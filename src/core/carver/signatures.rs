//! Built-in file signatures
//!
//! Patterns are byte regexes compiled with Unicode disabled, so `\xff`
//! names a raw byte. `.` matches any byte except `\n`.

use serde::{Deserialize, Serialize};

/// A carvable file type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Type tag reported on hits, also used to filter scans
    pub extension: String,
    /// Pattern marking the first bytes of the file
    pub start: String,
    /// Pattern marking the last bytes of the file, if the format has one
    #[serde(default)]
    pub end: Option<String>,
    /// Length reported when no end pattern is found
    pub max_length: u64,
    #[serde(default)]
    pub comment: String,
}

impl Signature {
    pub fn new(extension: &str, start: &str, max_length: u64) -> Self {
        Signature {
            extension: extension.to_string(),
            start: start.to_string(),
            end: None,
            max_length,
            comment: String::new(),
        }
    }

    pub fn with_end(mut self, end: &str) -> Self {
        self.end = Some(end.to_string());
        self
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }
}

/// The stock signature table
pub fn default_signatures() -> Vec<Signature> {
    vec![
        Signature::new("jpg", r"\xff\xd8....(JFIF|Exif)", 1_500_000),
        Signature::new("gif", r"GIF8[79]a", 50_000),
        Signature::new("png", r"\x89PNG\x0d\x0a\x1a\x0a", 500_000)
            .with_end(r"\x45\x4e\x44\xae\x42\x60\x82"),
        Signature::new("tif", r"\x4d\x4d\x00\x2a\x00", 1_000_000),
        Signature::new("doc", r"\xd0\xcf\x11\xe0", 500_000),
        Signature::new("pdf", r"%PDF-", 1_000_000).with_end(r".%%EOF\x0d"),
        Signature::new("eps", r"%!PS-Adobe", 1_000_000)
            .with_end(r"end.%%.trailer")
            .with_comment("Encapsulated Postscript"),
        Signature::new("eps", r"%!PS-Adobe", 1_000_000)
            .with_end(r"%%EOF.")
            .with_comment("Encapsulated Postscript"),
        Signature::new("ie_hist", r"Client UrlCache", 300_000)
            .with_comment("Internet Explorer history file"),
        Signature::new("url", r"URL \x03\x00\x00\x00", 384)
            .with_comment("Internet Explorer URL cache"),
        Signature::new("url", r"URL \x02\x00\x00\x00", 256)
            .with_comment("Internet Explorer URL cache"),
        Signature::new("mov", r"....free.....mov", 1_000_000).with_comment("Quicktime, free atom"),
        Signature::new("mov", r"MOVI", 1_000_000).with_comment("Quicktime, MOVI"),
        Signature::new("mov", r"....moov", 1_000_000).with_comment("Quicktime, moov atom"),
        Signature::new("mov", r"....mdat", 1_000_000).with_comment("Quicktime, mdat atom"),
        Signature::new("avi", r"RIFF....AVI", 1_000_000),
        Signature::new("wmv", r"\x30\x26\xb2\x75\x8e\x66", 1_000_000),
        Signature::new("zip", r"PK\x03\x04", 1_000_000).with_end(r"PK\x05\x06.{18}"),
        Signature::new("pst", r"!BDNF", 10_000_000).with_comment("Outlook personal folder"),
        Signature::new("gz", r"\x1F\x8B\x08[\x00\x08]", 10_000),
    ]
}
