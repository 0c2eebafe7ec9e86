//! Upload validation by file signature.
//!
//! Every supported extension maps to a static [`FormatRule`]. A rule can
//! require a header signature at offset 0 (any one of several variants), a
//! second signature at a fixed offset, a trailer near or at the end of the
//! file, a set of entries inside a ZIP container, and a content-level parse
//! check. All present checks must pass; the first failure rejects the file.
//!
//! | Extension | Header | Extra |
//! |-----------|--------|-------|
//! | `txt`, `md` | none | none |
//! | `json` | none | must parse as JSON |
//! | `csv` | none | every row has the header's field count |
//! | `pdf` | `%PDF-` | `%%EOF` within the last 1024 bytes |
//! | `docx` | ZIP local/empty/spanned | `[Content_Types].xml` + `word/` |
//! | `pptx` | ZIP local | `[Content_Types].xml` + `ppt/` |
//! | `xlsx` | ZIP local | `[Content_Types].xml` + `xl/` |
//! | `mp3` | `ID3`, `FF FB`, `FF F3` | none |
//! | `wav` | `RIFF` | `WAVE` at offset 8 |
//! | `png` | 8-byte PNG magic | 12-byte `IEND` chunk at end |
//! | `jpg` | `FF D8 FF E0/E1/E8` | `FF D9` at end |
//!
//! Validation reads from a `Read + Seek` source and rewinds it to offset 0
//! before returning, whether or not the file was accepted.

use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::ValidationError;

/// Bytes inspected for header signatures.
const HEADER_LEN: usize = 64;

const ZIP_LOCAL: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY: &[u8] = b"PK\x05\x06";
const ZIP_SPANNED: &[u8] = b"PK\x07\x08";
const CONTENT_TYPES: &str = "[Content_Types].xml";

/// Where a trailer marker must appear.
#[derive(Debug, Clone, Copy)]
pub enum Trailer {
    /// Marker occurs anywhere in the last `window` bytes.
    Within {
        window: usize,
        marker: &'static [u8],
    },
    /// File ends with exactly these bytes.
    EndsWith(&'static [u8]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCheck {
    Json,
    Csv,
}

/// Validation rule for one extension.
#[derive(Debug, Clone, Copy)]
pub struct FormatRule {
    /// Accepted header signatures at offset 0. Empty means no header check.
    pub signatures: &'static [&'static [u8]],
    /// Second signature required at a fixed offset.
    pub sub_signature: Option<(usize, &'static [u8])>,
    pub trailer: Option<Trailer>,
    /// Required ZIP entries. Names ending in `/` match any entry under that folder.
    pub container_entries: &'static [&'static str],
    pub content: Option<ContentCheck>,
}

impl FormatRule {
    const fn open() -> Self {
        Self {
            signatures: &[],
            sub_signature: None,
            trailer: None,
            container_entries: &[],
            content: None,
        }
    }
}

static RULES: &[(&str, FormatRule)] = &[
    ("txt", FormatRule::open()),
    ("md", FormatRule::open()),
    (
        "json",
        FormatRule {
            content: Some(ContentCheck::Json),
            ..FormatRule::open()
        },
    ),
    (
        "csv",
        FormatRule {
            content: Some(ContentCheck::Csv),
            ..FormatRule::open()
        },
    ),
    (
        "pdf",
        FormatRule {
            signatures: &[b"%PDF-"],
            trailer: Some(Trailer::Within {
                window: 1024,
                marker: b"%%EOF",
            }),
            ..FormatRule::open()
        },
    ),
    (
        "docx",
        FormatRule {
            signatures: &[ZIP_LOCAL, ZIP_EMPTY, ZIP_SPANNED],
            container_entries: &[CONTENT_TYPES, "word/"],
            ..FormatRule::open()
        },
    ),
    (
        "pptx",
        FormatRule {
            signatures: &[ZIP_LOCAL],
            container_entries: &[CONTENT_TYPES, "ppt/"],
            ..FormatRule::open()
        },
    ),
    (
        "xlsx",
        FormatRule {
            signatures: &[ZIP_LOCAL],
            container_entries: &[CONTENT_TYPES, "xl/"],
            ..FormatRule::open()
        },
    ),
    (
        "mp3",
        FormatRule {
            signatures: &[b"ID3", b"\xFF\xFB", b"\xFF\xF3"],
            ..FormatRule::open()
        },
    ),
    (
        "wav",
        FormatRule {
            signatures: &[b"RIFF"],
            sub_signature: Some((8, b"WAVE")),
            ..FormatRule::open()
        },
    ),
    (
        "png",
        FormatRule {
            signatures: &[b"\x89PNG\r\n\x1a\n"],
            trailer: Some(Trailer::EndsWith(
                b"\x00\x00\x00\x00IEND\xAE\x42\x60\x82",
            )),
            ..FormatRule::open()
        },
    ),
    (
        "jpg",
        FormatRule {
            signatures: &[b"\xFF\xD8\xFF\xE0", b"\xFF\xD8\xFF\xE1", b"\xFF\xD8\xFF\xE8"],
            trailer: Some(Trailer::EndsWith(b"\xFF\xD9")),
            ..FormatRule::open()
        },
    ),
];

/// Lowercase an extension and strip any leading dots (`".PDF"` → `"pdf"`).
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Normalized extension of a file name, if it has one.
pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(normalize_extension)
        .filter(|e| !e.is_empty())
}

pub fn rule_for(ext: &str) -> Option<&'static FormatRule> {
    let ext = normalize_extension(ext);
    RULES.iter().find(|(e, _)| *e == ext).map(|(_, r)| r)
}

pub fn supported_extensions() -> impl Iterator<Item = &'static str> {
    RULES.iter().map(|(e, _)| *e)
}

/// Validates uploaded bytes against their claimed extension.
#[derive(Debug, Clone, Default)]
pub struct FormatSniffer {
    max_bytes: Option<u64>,
}

impl FormatSniffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject sources longer than `limit` bytes before any rule runs.
    pub fn with_max_bytes(mut self, limit: u64) -> Self {
        self.max_bytes = Some(limit);
        self
    }

    /// Validate `source` as a file named `file_name`.
    ///
    /// The source is rewound to offset 0 before returning.
    pub fn validate<R: Read + Seek>(
        &self,
        file_name: &str,
        source: &mut R,
    ) -> Result<(), ValidationError> {
        let ext = extension_of(file_name).unwrap_or_default();
        let rule =
            rule_for(&ext).ok_or_else(|| ValidationError::UnsupportedExtension(ext.clone()))?;
        let outcome = self.apply(&ext, rule, source);
        let rewound = source.seek(SeekFrom::Start(0)).map_err(unreadable);
        outcome.and(rewound.map(|_| ()))
    }

    /// Boolean form of [`validate`](Self::validate).
    pub fn is_valid<R: Read + Seek>(&self, file_name: &str, source: &mut R) -> bool {
        self.validate(file_name, source).is_ok()
    }

    fn apply<R: Read + Seek>(
        &self,
        ext: &str,
        rule: &FormatRule,
        source: &mut R,
    ) -> Result<(), ValidationError> {
        let len = source.seek(SeekFrom::End(0)).map_err(unreadable)?;
        if let Some(limit) = self.max_bytes {
            if len > limit {
                return Err(ValidationError::TooLarge { size: len, limit });
            }
        }

        source.seek(SeekFrom::Start(0)).map_err(unreadable)?;
        let header = read_up_to(source, HEADER_LEN).map_err(unreadable)?;
        check_header(ext, rule, &header)?;

        if let Some(trailer) = rule.trailer {
            check_trailer(ext, trailer, source, len)?;
        }

        if !rule.container_entries.is_empty() {
            source.seek(SeekFrom::Start(0)).map_err(unreadable)?;
            check_container(ext, rule.container_entries, source)?;
        }

        if let Some(check) = rule.content {
            source.seek(SeekFrom::Start(0)).map_err(unreadable)?;
            check_content(ext, check, source)?;
        }

        Ok(())
    }
}

fn unreadable(e: io::Error) -> ValidationError {
    ValidationError::Unreadable(e.to_string())
}

fn read_up_to<R: Read>(source: &mut R, limit: usize) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(limit);
    source.take(limit as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

fn check_header(ext: &str, rule: &FormatRule, header: &[u8]) -> Result<(), ValidationError> {
    let mismatch = || ValidationError::SignatureMismatch {
        ext: ext.to_string(),
    };
    if !rule.signatures.is_empty() && !rule.signatures.iter().any(|sig| header.starts_with(sig)) {
        return Err(mismatch());
    }
    if let Some((offset, sig)) = rule.sub_signature {
        let matches = header
            .get(offset..offset + sig.len())
            .map(|slice| slice == sig)
            .unwrap_or(false);
        if !matches {
            return Err(mismatch());
        }
    }
    Ok(())
}

fn check_trailer<R: Read + Seek>(
    ext: &str,
    trailer: Trailer,
    source: &mut R,
    len: u64,
) -> Result<(), ValidationError> {
    let window = match trailer {
        Trailer::Within { window, .. } => window,
        Trailer::EndsWith(marker) => marker.len(),
    };
    let start = len.saturating_sub(window as u64);
    source.seek(SeekFrom::Start(start)).map_err(unreadable)?;
    let tail = read_up_to(source, window).map_err(unreadable)?;

    let ok = match trailer {
        Trailer::Within { marker, .. } => tail.windows(marker.len()).any(|w| w == marker),
        Trailer::EndsWith(marker) => tail.ends_with(marker),
    };
    if ok {
        Ok(())
    } else {
        Err(ValidationError::TrailerMismatch {
            ext: ext.to_string(),
        })
    }
}

fn check_container<R: Read + Seek>(
    ext: &str,
    required: &[&str],
    source: &mut R,
) -> Result<(), ValidationError> {
    let archive = zip::ZipArchive::new(source).map_err(|e| ValidationError::StructureMismatch {
        ext: ext.to_string(),
        detail: format!("not a readable archive: {}", e),
    })?;
    for entry in required {
        let present = if entry.ends_with('/') {
            archive.file_names().any(|n| n.starts_with(entry))
        } else {
            archive.file_names().any(|n| n == *entry)
        };
        if !present {
            return Err(ValidationError::StructureMismatch {
                ext: ext.to_string(),
                detail: format!("missing entry {}", entry),
            });
        }
    }
    Ok(())
}

fn check_content<R: Read>(ext: &str, check: ContentCheck, source: &mut R) -> Result<(), ValidationError> {
    let invalid = |detail: String| ValidationError::ContentInvalid {
        ext: ext.to_string(),
        detail,
    };
    match check {
        ContentCheck::Json => {
            serde_json::from_reader::<_, serde::de::IgnoredAny>(source)
                .map_err(|e| invalid(e.to_string()))?;
        }
        ContentCheck::Csv => {
            let mut data = Vec::new();
            source
                .read_to_end(&mut data)
                .map_err(|e| invalid(e.to_string()))?;
            // The csv reader drops empty lines; they count as zero-field rows.
            if let Some(line) = first_blank_line(&data) {
                return Err(invalid(format!("line {line} is an empty row")));
            }
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_reader(data.as_slice());
            let mut records = reader.records();
            let header = match records.next() {
                Some(rec) => rec.map_err(|e| invalid(e.to_string()))?,
                None => return Err(invalid("empty csv".to_string())),
            };
            for (row, rec) in records.enumerate() {
                let rec = rec.map_err(|e| invalid(e.to_string()))?;
                if rec.len() != header.len() {
                    return Err(invalid(format!(
                        "row {} has {} fields, header has {}",
                        row + 2,
                        rec.len(),
                        header.len()
                    )));
                }
            }
        }
    }
    Ok(())
}

/// 1-based number of the first empty line outside a quoted field. The
/// newline that ends the last row does not open another line.
fn first_blank_line(data: &[u8]) -> Option<usize> {
    let mut in_quotes = false;
    let mut at_line_start = true;
    let mut line = 1;
    for (i, &b) in data.iter().enumerate() {
        let ends_line = b == b'\n' || (b == b'\r' && data.get(i + 1) == Some(&b'\n'));
        if at_line_start && !in_quotes && ends_line {
            return Some(line);
        }
        match b {
            b'"' => in_quotes = !in_quotes,
            b'\n' => line += 1,
            _ => {}
        }
        at_line_start = b == b'\n';
    }
    None
}
