//! Office Open XML documents (docx, pptx, xlsx).
//!
//! Text lives in XML parts inside the ZIP container: `w:t` runs in
//! `word/document.xml`, `a:t` runs in `ppt/slides/slideN.xml`, and cell
//! values in `xl/worksheets/sheetN.xml` that index into
//! `xl/sharedStrings.xml`. Every part is read with a decompressed size cap.

use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use quick_xml::events::Event;
use ragdoc_core::embedding::EmbeddingProvider;
use ragdoc_core::error::{Error, Result};

use super::{embed_extracted, require_embedder, DocumentPlugin, Extraction};

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_PART_BYTES: u64 = 50 * 1024 * 1024;
const MAX_SHEETS: usize = 100;
const MAX_CELLS_PER_SHEET: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OoxmlKind {
    Docx,
    Pptx,
    Xlsx,
}

impl OoxmlKind {
    fn from_ext(ext: &str) -> Option<Self> {
        match ext {
            "docx" => Some(Self::Docx),
            "pptx" => Some(Self::Pptx),
            "xlsx" => Some(Self::Xlsx),
            _ => None,
        }
    }
}

pub struct OoxmlPlugin {
    kind: OoxmlKind,
    embedder: Arc<dyn EmbeddingProvider>,
}

pub fn create(ext: &str, embedder: Arc<dyn EmbeddingProvider>) -> Result<Arc<dyn DocumentPlugin>> {
    let kind = OoxmlKind::from_ext(ext).ok_or_else(|| Error::PluginInitFailed {
        ext: ext.to_string(),
        reason: "not an Office Open XML extension".into(),
    })?;
    require_embedder(ext, &embedder)?;
    Ok(Arc::new(OoxmlPlugin { kind, embedder }))
}

#[async_trait]
impl DocumentPlugin for OoxmlPlugin {
    fn name(&self) -> &str {
        match self.kind {
            OoxmlKind::Docx => "docx",
            OoxmlKind::Pptx => "pptx",
            OoxmlKind::Xlsx => "xlsx",
        }
    }

    fn supported_formats(&self) -> &'static [&'static str] {
        &["docx", "pptx", "xlsx"]
    }

    fn detect_by_header(&self, header: &[u8]) -> bool {
        header.starts_with(b"PK\x03\x04")
            || (self.kind == OoxmlKind::Docx
                && (header.starts_with(b"PK\x05\x06") || header.starts_with(b"PK\x07\x08")))
    }

    async fn extract(&self, path: &Path) -> Result<Option<Extraction>> {
        let bytes = tokio::fs::read(path).await?;
        let kind = self.kind;
        let text = tokio::task::spawn_blocking(move || extract_text(kind, &bytes))
            .await
            .map_err(|e| Error::Extraction(format!("{} extraction aborted: {e}", self.name())))??;
        embed_extracted(self.embedder.as_ref(), text).await
    }
}

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn ooxml_err(e: impl std::fmt::Display) -> Error {
    Error::Extraction(format!("ooxml: {e}"))
}

pub fn extract_text(kind: OoxmlKind, bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(ooxml_err)?;
    match kind {
        OoxmlKind::Docx => {
            let xml = read_part(&mut archive, "word/document.xml")?;
            collect_runs(&xml, b"p")
        }
        OoxmlKind::Pptx => {
            let mut parts = Vec::new();
            for name in numbered_parts(&archive, "ppt/slides/slide") {
                let xml = read_part(&mut archive, &name)?;
                parts.push(collect_runs(&xml, b"p")?);
            }
            Ok(join_non_empty(parts))
        }
        OoxmlKind::Xlsx => {
            let shared = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
                shared_strings(&read_part(&mut archive, "xl/sharedStrings.xml")?)?
            } else {
                Vec::new()
            };
            let mut parts = Vec::new();
            for name in numbered_parts(&archive, "xl/worksheets/sheet")
                .into_iter()
                .take(MAX_SHEETS)
            {
                let xml = read_part(&mut archive, &name)?;
                parts.push(sheet_text(&xml, &shared)?);
            }
            Ok(join_non_empty(parts))
        }
    }
}

fn read_part(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ooxml_err(format!("{name}: {e}")))?;
    let mut out = Vec::new();
    entry
        .take(MAX_PART_BYTES)
        .read_to_end(&mut out)
        .map_err(ooxml_err)?;
    if out.len() as u64 >= MAX_PART_BYTES {
        return Err(ooxml_err(format!(
            "{name} exceeds size limit ({MAX_PART_BYTES} bytes)"
        )));
    }
    Ok(out)
}

/// Entries named `<prefix>N.xml`, ordered by N.
fn numbered_parts(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|n| {
            let num = n.strip_prefix(prefix)?.strip_suffix(".xml")?.parse().ok()?;
            Some((num, n.to_string()))
        })
        .collect();
    names.sort();
    names.into_iter().map(|(_, n)| n).collect()
}

fn join_non_empty(parts: Vec<String>) -> String {
    parts
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Concatenate the text of every `t` element, starting a new line at the
/// end of each `paragraph` element.
fn collect_runs(xml: &[u8], paragraph: &[u8]) -> Result<String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf).map_err(ooxml_err)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::Text(te) if in_text => {
                out.push_str(&te.unescape().map_err(ooxml_err)?);
            }
            Event::End(e) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if name.as_ref() == paragraph && !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

/// One string per `si` item, concatenating rich-text runs.
fn shared_strings(xml: &[u8]) -> Result<Vec<String>> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf).map_err(ooxml_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = current.is_some(),
                _ => {}
            },
            Event::Text(te) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().map_err(ooxml_err)?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.extend(current.take()),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

#[derive(Clone, Copy, PartialEq)]
enum CellType {
    Shared,
    Inline,
    Value,
}

/// Cells separated by tabs, rows by newlines. Shared-string cells are
/// resolved; inline strings and plain values are taken as written.
fn sheet_text(xml: &[u8], shared: &[String]) -> Result<String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell_type = CellType::Value;
    let mut capture = false;
    let mut cells = 0usize;
    loop {
        if cells >= MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf).map_err(ooxml_err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"c" => {
                    cell_type = CellType::Value;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            cell_type = match attr.value.as_ref() {
                                b"s" => CellType::Shared,
                                b"inlineStr" => CellType::Inline,
                                _ => CellType::Value,
                            };
                        }
                    }
                }
                b"v" => capture = cell_type != CellType::Inline,
                b"t" => capture = cell_type == CellType::Inline,
                _ => {}
            },
            Event::Text(te) if capture => {
                let raw = te.unescape().map_err(ooxml_err)?;
                let raw = raw.trim();
                let value = match cell_type {
                    CellType::Shared => raw
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared.get(i).cloned()),
                    _ => Some(raw.to_string()),
                };
                if let Some(v) = value.filter(|v| !v.is_empty()) {
                    row.push(v);
                    cells += 1;
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = false,
                b"row" => {
                    if !row.is_empty() {
                        rows.push(row.join("\t"));
                        row.clear();
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join("\t"));
    }
    Ok(rows.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let bytes = archive(&[(
            "word/document.xml",
            r#"<w:document xmlns:w="w"><w:body>
                <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p>
                <w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p>
            </w:body></w:document>"#,
        )]);
        assert_eq!(
            extract_text(OoxmlKind::Docx, &bytes).unwrap(),
            "Hello world\nSecond & last"
        );
    }

    #[test]
    fn pptx_slides_in_numeric_order() {
        let slide = |t: &str| format!(r#"<p:sld xmlns:a="a" xmlns:p="p"><a:p><a:r><a:t>{t}</a:t></a:r></a:p></p:sld>"#);
        let s2 = slide("two");
        let s10 = slide("ten");
        let s1 = slide("one");
        let bytes = archive(&[
            ("ppt/slides/slide10.xml", s10.as_str()),
            ("ppt/slides/slide2.xml", s2.as_str()),
            ("ppt/slides/slide1.xml", s1.as_str()),
        ]);
        assert_eq!(extract_text(OoxmlKind::Pptx, &bytes).unwrap(), "one\ntwo\nten");
    }

    #[test]
    fn xlsx_resolves_shared_and_inline_cells() {
        let bytes = archive(&[
            (
                "xl/sharedStrings.xml",
                r#"<sst><si><t>name</t></si><si><r><t>sco</t></r><r><t>re</t></r></si><si><t>Ada</t></si></sst>"#,
            ),
            (
                "xl/worksheets/sheet1.xml",
                r#"<worksheet><sheetData>
                    <row><c t="s"><v>0</v></c><c t="s"><v>1</v></c></row>
                    <row><c t="s"><v>2</v></c><c><v>42</v></c><c t="inlineStr"><is><t>note</t></is></c></row>
                </sheetData></worksheet>"#,
            ),
        ]);
        assert_eq!(
            extract_text(OoxmlKind::Xlsx, &bytes).unwrap(),
            "name\tscore\nAda\t42\tnote"
        );
    }

    #[test]
    fn missing_main_part_is_extraction_error() {
        let bytes = archive(&[("word/styles.xml", "<styles/>")]);
        assert!(matches!(
            extract_text(OoxmlKind::Docx, &bytes),
            Err(Error::Extraction(_))
        ));
        assert!(matches!(
            extract_text(OoxmlKind::Docx, b"not a zip"),
            Err(Error::Extraction(_))
        ));
    }

    #[test]
    fn create_rejects_foreign_extension() {
        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::new(ragdoc_core::embedding::HashProvider::new(8));
        assert!(matches!(
            create("pdf", embedder),
            Err(Error::PluginInitFailed { .. })
        ));
    }
}
