//! Office Open XML (DOCX, PPTX) readers shared by extraction and page counting.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{Cursor, Read};
use zip::ZipArchive;

pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const PPTX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

const DOCX_BODY: &str = "word/document.xml";

#[derive(Debug, thiserror::Error)]
pub enum OfficeError {
    #[error("invalid archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("invalid XML in {part}: {message}")]
    Xml { part: String, message: String },

    #[error("failed to read {part}: {source}")]
    Io {
        part: String,
        #[source]
        source: std::io::Error,
    },

    #[error("missing part {0}")]
    MissingPart(String),
}

/// Body-level content counts of a Word document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocxStats {
    pub paragraphs: usize,
    pub tables: usize,
    pub images: usize,
}

fn open(data: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>, OfficeError> {
    Ok(ZipArchive::new(Cursor::new(data))?)
}

fn read_part(archive: &mut ZipArchive<Cursor<&[u8]>>, part: &str) -> Result<String, OfficeError> {
    let mut file = match archive.by_name(part) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(OfficeError::MissingPart(part.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let mut xml = String::new();
    file.read_to_string(&mut xml).map_err(|source| OfficeError::Io {
        part: part.to_string(),
        source,
    })?;
    Ok(xml)
}

fn xml_error(part: &str, e: impl std::fmt::Display) -> OfficeError {
    OfficeError::Xml {
        part: part.to_string(),
        message: e.to_string(),
    }
}

/// Collects the text runs of one XML part. `text_tag` holds run text, `paragraph_tag`
/// ends a line.
fn collect_text(
    xml: &str,
    part: &str,
    text_tag: &[u8],
    paragraph_tag: &[u8],
    out: &mut String,
) -> Result<(), OfficeError> {
    let mut reader = Reader::from_str(xml);
    let mut in_text = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == text_tag => in_text = true,
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"w:tab" => out.push('\t'),
                b"w:br" | b"a:br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(ref e)) if in_text => {
                let text = e.unescape().map_err(|e| xml_error(part, e))?;
                out.push_str(&text);
            }
            Ok(Event::End(ref e)) => {
                let name = e.name();
                if name.as_ref() == text_tag {
                    in_text = false;
                } else if name.as_ref() == paragraph_tag {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(part, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(())
}

pub fn docx_text(data: &[u8]) -> Result<String, OfficeError> {
    let mut archive = open(data)?;
    let xml = read_part(&mut archive, DOCX_BODY)?;
    let mut text = String::new();
    collect_text(&xml, DOCX_BODY, b"w:t", b"w:p", &mut text)?;
    Ok(text.trim_end().to_string())
}

/// Slide parts (`ppt/slides/slideN.xml`) in slide order.
fn slide_parts(archive: &ZipArchive<Cursor<&[u8]>>) -> Vec<String> {
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    slides.sort_by_key(|(number, _)| *number);
    slides.into_iter().map(|(_, name)| name).collect()
}

pub fn pptx_text(data: &[u8]) -> Result<String, OfficeError> {
    let mut archive = open(data)?;
    let mut text = String::new();
    for part in slide_parts(&archive) {
        let xml = read_part(&mut archive, &part)?;
        collect_text(&xml, &part, b"a:t", b"a:p", &mut text)?;
        text.push('\n');
    }
    Ok(text.trim_end().to_string())
}

pub fn pptx_slide_count(data: &[u8]) -> Result<usize, OfficeError> {
    let archive = open(data)?;
    Ok(slide_parts(&archive).len())
}

/// Counts body paragraphs, tables and embedded pictures. Paragraphs and pictures
/// inside tables are not counted; a table is weighted as a whole.
pub fn docx_stats(data: &[u8]) -> Result<DocxStats, OfficeError> {
    let mut archive = open(data)?;
    let xml = read_part(&mut archive, DOCX_BODY)?;

    let mut stats = DocxStats::default();
    let mut table_depth = 0usize;
    let mut reader = Reader::from_str(&xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"w:tbl" => {
                    if table_depth == 0 {
                        stats.tables += 1;
                    }
                    table_depth += 1;
                }
                b"w:p" if table_depth == 0 => stats.paragraphs += 1,
                b"pic:pic" if table_depth == 0 => stats.images += 1,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"w:p" if table_depth == 0 => stats.paragraphs += 1,
                _ => {}
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"w:tbl" => {
                table_depth = table_depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(DOCX_BODY, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(stats)
}
