// src/office.rs

//! Text from Office Open XML documents (docx, pptx, xlsx).
//!
//! All three are zip archives of XML parts. Only the parts that carry the
//! visible text are read; styles, images and relationships are ignored.

use crate::error::OfficeError;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::io::{Cursor, Read, Seek};
use zip::ZipArchive;
use zip::result::ZipError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfficeKind {
    Word,
    Slides,
    Sheet,
}

impl OfficeKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "docx" => Some(Self::Word),
            "pptx" => Some(Self::Slides),
            "xlsx" => Some(Self::Sheet),
            _ => None,
        }
    }
}

/// Collect the text of an office document. Paragraphs and sheet rows become lines.
pub fn extract_office_text(bytes: &[u8], kind: OfficeKind) -> Result<String, OfficeError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let text = match kind {
        OfficeKind::Word => paragraph_text(&read_entry(&mut archive, "word/document.xml")?)?,
        OfficeKind::Slides => {
            let slides = numbered_entries(&archive, "ppt/slides/slide");
            if slides.is_empty() {
                return Err(OfficeError::MissingPart("ppt/slides".to_string()));
            }
            let mut parts = Vec::with_capacity(slides.len());
            for name in slides {
                parts.push(paragraph_text(&read_entry(&mut archive, &name)?)?);
            }
            parts.join("\n\n")
        }
        OfficeKind::Sheet => sheet_text(&mut archive)?,
    };
    Ok(text.trim().to_string())
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<String, OfficeError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Err(OfficeError::MissingPart(name.to_string())),
        Err(e) => return Err(e.into()),
    };
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    Ok(xml)
}

/// Entries named `<prefix><n>.xml`, in numeric order (slide2 before slide10).
fn numbered_entries<R: Read + Seek>(archive: &ZipArchive<R>, prefix: &str) -> Vec<String> {
    let mut numbered: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let n = name.strip_prefix(prefix)?.strip_suffix(".xml")?.parse().ok()?;
            Some((n, name.to_string()))
        })
        .collect();
    numbered.sort_unstable();
    numbered.into_iter().map(|(_, name)| name).collect()
}

/// Text runs (`w:t`, `a:t`) with a line break after each paragraph.
fn paragraph_text(xml: &str) -> Result<String, OfficeError> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_run = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_run = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_run = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"p" => out.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_run => {
                out.push_str(&t.unescape().map_err(quick_xml::Error::from)?);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

fn sheet_text<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String, OfficeError> {
    // Workbooks with only numbers have no shared strings part
    let shared = match read_entry(archive, "xl/sharedStrings.xml") {
        Ok(xml) => shared_strings(&xml)?,
        Err(OfficeError::MissingPart(_)) => Vec::new(),
        Err(e) => return Err(e),
    };

    let sheets = numbered_entries(archive, "xl/worksheets/sheet");
    if sheets.is_empty() {
        return Err(OfficeError::MissingPart("xl/worksheets".to_string()));
    }
    let mut parts = Vec::with_capacity(sheets.len());
    for name in sheets {
        parts.push(sheet_rows(&read_entry(archive, &name)?, &shared)?);
    }
    Ok(parts.join("\n\n"))
}

/// Each `<si>` item, rich-text runs concatenated.
fn shared_strings(xml: &str) -> Result<Vec<String>, OfficeError> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"t" => in_text = false,
                _ => {}
            },
            Event::Text(t) if in_text => {
                current.push_str(&t.unescape().map_err(quick_xml::Error::from)?);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(strings)
}

/// One line per row, cells separated by tabs. Shared-string cells are resolved.
fn sheet_rows(xml: &str, shared: &[String]) -> Result<String, OfficeError> {
    let mut reader = Reader::from_str(xml);
    let mut rows = Vec::new();
    let mut cells: Vec<String> = Vec::new();
    let mut shared_cell = false;
    let mut capture = false;
    let mut value = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"c" => {
                    shared_cell = e
                        .attributes()
                        .flatten()
                        .any(|a| a.key.local_name().as_ref() == b"t" && a.value.as_ref() == b"s");
                    value.clear();
                }
                b"v" | b"t" => capture = true,
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = false,
                b"c" => {
                    let text = if shared_cell {
                        value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared.get(i))
                            .cloned()
                            .unwrap_or_default()
                    } else {
                        value.clone()
                    };
                    if !text.is_empty() {
                        cells.push(text);
                    }
                }
                b"row" => {
                    if !cells.is_empty() {
                        rows.push(cells.join("\t"));
                        cells.clear();
                    }
                }
                _ => {}
            },
            Event::Text(t) if capture => {
                value.push_str(&t.unescape().map_err(quick_xml::Error::from)?);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rows.join("\n"))
}

/// Zip `entries` into an in-memory archive.
#[cfg(test)]
pub(crate) fn build_archive(entries: &[(&str, &str)]) -> Vec<u8> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, body) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[cfg(test)]
pub(crate) const RECEIPT_DOCX_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:r><w:t>Walmart</w:t></w:r></w:p>
<w:p><w:r><w:t xml:space="preserve">Total: </w:t></w:r><w:r><w:t>$42.50</w:t></w:r></w:p>
<w:p><w:r><w:t>Tax:</w:t><w:tab/><w:t>$3.50 &amp; tip</w:t></w:r></w:p>
</w:body></w:document>"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn slide(text: &str) -> String {
        format!(
            r#"<p:sld xmlns:p="p" xmlns:a="a"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{text}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#
        )
    }

    #[test]
    fn test_docx_paragraphs() {
        let docx = build_archive(&[
            ("[Content_Types].xml", "<Types/>"),
            ("word/document.xml", RECEIPT_DOCX_XML),
        ]);
        assert_eq!(
            extract_office_text(&docx, OfficeKind::Word).unwrap(),
            "Walmart\nTotal: $42.50\nTax:\t$3.50 & tip"
        );
    }

    #[test]
    fn test_pptx_slides_in_numeric_order() {
        let ten = slide("Grand Total 100.00");
        let two = slide("Invoice 7");
        let pptx = build_archive(&[
            ("ppt/slides/slide10.xml", ten.as_str()),
            ("ppt/slides/slide2.xml", two.as_str()),
            ("ppt/slides/_rels/slide2.xml.rels", "<Relationships/>"),
        ]);
        assert_eq!(
            extract_office_text(&pptx, OfficeKind::Slides).unwrap(),
            "Invoice 7\n\nGrand Total 100.00"
        );
    }

    #[test]
    fn test_xlsx_resolves_shared_strings() {
        let shared = r#"<sst><si><t>Vendor</t></si><si><t>Tesco</t></si><si><r><t>To</t></r><r><t>tal</t></r></si></sst>"#;
        let sheet = r#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
            <row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"><v>10.5</v></c><c r="C2"/></row>
            <row r="3"><c r="A3" t="inlineStr"><is><t>Paid by card</t></is></c></row>
        </sheetData></worksheet>"#;
        let xlsx = build_archive(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        assert_eq!(
            extract_office_text(&xlsx, OfficeKind::Sheet).unwrap(),
            "Vendor\tTesco\nTotal\t10.5\nPaid by card"
        );
    }

    #[test]
    fn test_missing_body_part() {
        let docx = build_archive(&[("[Content_Types].xml", "<Types/>")]);
        assert!(matches!(
            extract_office_text(&docx, OfficeKind::Word),
            Err(OfficeError::MissingPart(part)) if part == "word/document.xml"
        ));
    }

    #[test]
    fn test_not_an_archive() {
        assert!(matches!(
            extract_office_text(b"plain text, not a zip", OfficeKind::Word),
            Err(OfficeError::Archive(_))
        ));
    }

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(OfficeKind::from_extension("docx"), Some(OfficeKind::Word));
        assert_eq!(OfficeKind::from_extension("xlsx"), Some(OfficeKind::Sheet));
        assert_eq!(OfficeKind::from_extension("doc"), None);
    }
}
