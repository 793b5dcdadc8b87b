//! WordprocessingML (`.docx`) document builder.
//!
//! [`Document`] accumulates a flat list of [`Block`]s (headings, paragraphs,
//! list items, tables, page breaks) and serialises them into a minimal but
//! complete OOXML package:
//!
//! ```text
//! [Content_Types].xml
//! _rels/.rels
//! docProps/core.xml
//! word/document.xml
//! word/styles.xml
//! word/numbering.xml
//! word/_rels/document.xml.rels
//! ```
//!
//! The builder is the only document capability exposed to generated scripts
//! (see [`crate::lua_runtime`]) and is also the target of the HTML export path
//! (see [`crate::html`]).

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::borrow::Cow;
use std::io::{Cursor, Write};
use thiserror::Error;

pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const NS_W: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// `w:numId` values declared in `word/numbering.xml`.
const NUM_ID_BULLET: &str = "1";
const NUM_ID_DECIMAL: &str = "2";

#[derive(Debug, Error)]
pub enum DocxError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("XML serialisation failed: {0}")]
    Xml(String),
    #[error("ZIP packaging failed: {0}")]
    Zip(String),
}

fn xml_err(e: impl std::fmt::Display) -> DocxError {
    DocxError::Xml(e.to_string())
}

fn zip_err(e: impl std::fmt::Display) -> DocxError {
    DocxError::Zip(e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
    Justify,
}

impl Alignment {
    pub fn parse(s: &str) -> Result<Self, DocxError> {
        match s.to_ascii_lowercase().as_str() {
            "left" | "start" => Ok(Alignment::Left),
            "center" | "centre" => Ok(Alignment::Center),
            "right" | "end" => Ok(Alignment::Right),
            "justify" | "both" => Ok(Alignment::Justify),
            other => Err(DocxError::InvalidArgument(format!(
                "unknown alignment '{}'",
                other
            ))),
        }
    }

    fn ooxml(self) -> &'static str {
        match self {
            Alignment::Left => "left",
            Alignment::Center => "center",
            Alignment::Right => "right",
            Alignment::Justify => "both",
        }
    }
}

/// Character formatting for a run of text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStyle {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    /// Font size in points.
    pub size_pt: Option<f32>,
    /// Six-digit RGB hex, without `#`.
    pub color: Option<String>,
    pub font: Option<String>,
}

impl RunStyle {
    fn is_plain(&self) -> bool {
        *self == RunStyle::default()
    }

    /// Normalise and validate the font, color and size fields.
    pub fn validated(mut self) -> Result<Self, DocxError> {
        if let Some(font) = self.font.take() {
            let font = xml_safe_text(font.trim()).into_owned();
            self.font = (!font.is_empty()).then_some(font);
        }
        if let Some(color) = self.color.take() {
            let hex = color.trim().trim_start_matches('#').to_ascii_uppercase();
            if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(DocxError::InvalidArgument(format!(
                    "color must be a 6-digit hex value, got '{}'",
                    color
                )));
            }
            self.color = Some(hex);
        }
        if let Some(size) = self.size_pt {
            if !(1.0..=1638.0).contains(&size) {
                return Err(DocxError::InvalidArgument(format!(
                    "font size must be between 1 and 1638 points, got {}",
                    size
                )));
            }
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub text: String,
    pub style: RunStyle,
}

impl Run {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: RunStyle::default(),
        }
    }

    pub fn styled(text: impl Into<String>, style: RunStyle) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// Level 0 is the document title style; 1–6 map to `Heading1`..`Heading6`.
    Heading { level: u8, runs: Vec<Run> },
    Paragraph { runs: Vec<Run>, align: Alignment },
    ListItem { runs: Vec<Run>, ordered: bool, level: u8 },
    Table { rows: Vec<Vec<String>>, header: bool },
    PageBreak,
}

/// Fixed accounting cost of one block, on top of its text.
pub const BLOCK_OVERHEAD: usize = 64;
/// Fixed accounting cost of one run or table cell, on top of its text.
pub const RUN_OVERHEAD: usize = 16;

/// An in-memory document under construction.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub title: Option<String>,
    pub author: Option<String>,
    blocks: Vec<Block>,
    content_bytes: usize,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Approximate memory held by the blocks: text plus per-block,
    /// per-run and per-cell overhead (see [`block_footprint`]).
    pub fn content_bytes(&self) -> usize {
        self.content_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Append a block without validation. Used by trusted builders.
    pub fn push(&mut self, block: Block) {
        self.content_bytes += block_footprint(&block);
        self.blocks.push(block);
    }

    /// Validate and append a block.
    pub fn add(&mut self, block: Block) -> Result<(), DocxError> {
        validate_block(&block)?;
        self.push(block);
        Ok(())
    }

    pub fn heading(&mut self, text: impl Into<String>, level: u8) -> Result<(), DocxError> {
        self.add(Block::Heading {
            level,
            runs: vec![Run::plain(text)],
        })
    }

    pub fn paragraph(&mut self, runs: Vec<Run>, align: Alignment) {
        self.push(Block::Paragraph { runs, align });
    }

    pub fn list_item(&mut self, runs: Vec<Run>, ordered: bool, level: u8) -> Result<(), DocxError> {
        self.add(Block::ListItem {
            runs,
            ordered,
            level,
        })
    }

    pub fn table(&mut self, rows: Vec<Vec<String>>, header: bool) -> Result<(), DocxError> {
        self.add(Block::Table { rows, header })
    }

    pub fn page_break(&mut self) {
        self.push(Block::PageBreak);
    }

    /// Serialise the document into `.docx` bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DocxError> {
        self.to_bytes_at(Utc::now())
    }

    pub(crate) fn to_bytes_at(&self, created: DateTime<Utc>) -> Result<Vec<u8>, DocxError> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));

            let parts: [(&str, Vec<u8>); 7] = [
                ("[Content_Types].xml", CONTENT_TYPES.as_bytes().to_vec()),
                ("_rels/.rels", PACKAGE_RELS.as_bytes().to_vec()),
                ("docProps/core.xml", self.core_properties_xml(created)?),
                ("word/document.xml", self.document_xml()?),
                ("word/styles.xml", STYLES.as_bytes().to_vec()),
                ("word/numbering.xml", NUMBERING.as_bytes().to_vec()),
                ("word/_rels/document.xml.rels", DOCUMENT_RELS.as_bytes().to_vec()),
            ];

            for (name, data) in parts {
                let options = zip::write::SimpleFileOptions::default()
                    .compression_method(zip::CompressionMethod::Deflated);
                zip.start_file(name, options).map_err(zip_err)?;
                zip.write_all(&data).map_err(zip_err)?;
            }
            zip.finish().map_err(zip_err)?;
        }
        Ok(buf)
    }

    fn core_properties_xml(&self, created: DateTime<Utc>) -> Result<Vec<u8>, DocxError> {
        let mut w = XmlOut::new()?;
        w.start(
            "cp:coreProperties",
            &[
                (
                    "xmlns:cp",
                    "http://schemas.openxmlformats.org/package/2006/metadata/core-properties",
                ),
                ("xmlns:dc", "http://purl.org/dc/elements/1.1/"),
                ("xmlns:dcterms", "http://purl.org/dc/terms/"),
                ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
            ],
        )?;
        if let Some(title) = &self.title {
            w.text_element("dc:title", &[], title)?;
        }
        w.text_element(
            "dc:creator",
            &[],
            self.author.as_deref().unwrap_or("docforge"),
        )?;
        let stamp = created.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        w.text_element(
            "dcterms:created",
            &[("xsi:type", "dcterms:W3CDTF")],
            &stamp,
        )?;
        w.text_element(
            "dcterms:modified",
            &[("xsi:type", "dcterms:W3CDTF")],
            &stamp,
        )?;
        w.end("cp:coreProperties")?;
        Ok(w.finish())
    }

    fn document_xml(&self) -> Result<Vec<u8>, DocxError> {
        let mut w = XmlOut::new()?;
        w.start("w:document", &[("xmlns:w", NS_W), ("xmlns:r", NS_R)])?;
        w.start("w:body", &[])?;

        for block in &self.blocks {
            match block {
                Block::Heading { level, runs } => {
                    let style = if *level == 0 {
                        "Title".to_string()
                    } else {
                        format!("Heading{}", level)
                    };
                    write_paragraph(&mut w, Some(&style), None, None, runs)?;
                }
                Block::Paragraph { runs, align } => {
                    let align = (*align != Alignment::Left).then_some(*align);
                    write_paragraph(&mut w, None, align, None, runs)?;
                }
                Block::ListItem {
                    runs,
                    ordered,
                    level,
                } => {
                    let num_id = if *ordered {
                        NUM_ID_DECIMAL
                    } else {
                        NUM_ID_BULLET
                    };
                    write_paragraph(
                        &mut w,
                        Some("ListParagraph"),
                        None,
                        Some((num_id, *level)),
                        runs,
                    )?;
                }
                Block::Table { rows, header } => write_table(&mut w, rows, *header)?,
                Block::PageBreak => {
                    w.start("w:p", &[])?;
                    w.start("w:r", &[])?;
                    w.empty("w:br", &[("w:type", "page")])?;
                    w.end("w:r")?;
                    w.end("w:p")?;
                }
            }
        }

        // Letter-sized page with one-inch margins.
        w.start("w:sectPr", &[])?;
        w.empty("w:pgSz", &[("w:w", "12240"), ("w:h", "15840")])?;
        w.empty(
            "w:pgMar",
            &[
                ("w:top", "1440"),
                ("w:right", "1440"),
                ("w:bottom", "1440"),
                ("w:left", "1440"),
                ("w:header", "720"),
                ("w:footer", "720"),
                ("w:gutter", "0"),
            ],
        )?;
        w.end("w:sectPr")?;

        w.end("w:body")?;
        w.end("w:document")?;
        Ok(w.finish())
    }
}

fn validate_block(block: &Block) -> Result<(), DocxError> {
    match block {
        Block::Heading { level, .. } if *level > 6 => Err(DocxError::InvalidArgument(format!(
            "heading level must be 0-6, got {}",
            level
        ))),
        Block::ListItem { level, .. } if *level > 2 => Err(DocxError::InvalidArgument(format!(
            "list level must be 0-2, got {}",
            level
        ))),
        Block::Table { rows, .. } if rows.is_empty() => Err(DocxError::InvalidArgument(
            "table must have at least one row".to_string(),
        )),
        Block::Table { rows, .. } if rows.iter().all(|r| r.is_empty()) => Err(
            DocxError::InvalidArgument("table must have at least one cell".to_string()),
        ),
        _ => Ok(()),
    }
}

/// Accounting size of a block. Empty blocks still cost [`BLOCK_OVERHEAD`].
pub fn block_footprint(block: &Block) -> usize {
    let runs_cost = |runs: &[Run]| {
        runs.iter()
            .map(|r| RUN_OVERHEAD + r.text.len())
            .sum::<usize>()
    };
    let body = match block {
        Block::Heading { runs, .. }
        | Block::Paragraph { runs, .. }
        | Block::ListItem { runs, .. } => runs_cost(runs),
        Block::Table { rows, .. } => {
            let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
            let text: usize = rows.iter().flatten().map(String::len).sum();
            // Short rows are padded to the widest one when rendered.
            RUN_OVERHEAD
                .saturating_mul(columns)
                .saturating_mul(rows.len())
                .saturating_add(text)
        }
        Block::PageBreak => 0,
    };
    BLOCK_OVERHEAD.saturating_add(body)
}

/// Drop characters that XML 1.0 does not allow in text content.
pub fn xml_safe_text(text: &str) -> Cow<'_, str> {
    if text.chars().all(is_xml_char) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|&c| is_xml_char(c)).collect())
    }
}

fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r') || (c >= '\u{20}' && !matches!(c, '\u{FFFE}' | '\u{FFFF}'))
}

fn write_paragraph(
    w: &mut XmlOut,
    style: Option<&str>,
    align: Option<Alignment>,
    numbering: Option<(&str, u8)>,
    runs: &[Run],
) -> Result<(), DocxError> {
    w.start("w:p", &[])?;
    if style.is_some() || align.is_some() || numbering.is_some() {
        w.start("w:pPr", &[])?;
        if let Some(style) = style {
            w.empty("w:pStyle", &[("w:val", style)])?;
        }
        if let Some((num_id, level)) = numbering {
            let level = level.to_string();
            w.start("w:numPr", &[])?;
            w.empty("w:ilvl", &[("w:val", &level)])?;
            w.empty("w:numId", &[("w:val", num_id)])?;
            w.end("w:numPr")?;
        }
        if let Some(align) = align {
            w.empty("w:jc", &[("w:val", align.ooxml())])?;
        }
        w.end("w:pPr")?;
    }
    for run in runs {
        write_run(w, run)?;
    }
    w.end("w:p")
}

fn write_run(w: &mut XmlOut, run: &Run) -> Result<(), DocxError> {
    w.start("w:r", &[])?;
    let style = &run.style;
    if !style.is_plain() {
        w.start("w:rPr", &[])?;
        if let Some(font) = &style.font {
            w.empty("w:rFonts", &[("w:ascii", font), ("w:hAnsi", font)])?;
        }
        if style.bold {
            w.empty("w:b", &[])?;
        }
        if style.italic {
            w.empty("w:i", &[])?;
        }
        if let Some(color) = &style.color {
            w.empty("w:color", &[("w:val", color)])?;
        }
        if let Some(size) = style.size_pt {
            let half_points = ((size * 2.0).round() as u32).to_string();
            w.empty("w:sz", &[("w:val", &half_points)])?;
        }
        if style.underline {
            w.empty("w:u", &[("w:val", "single")])?;
        }
        w.end("w:rPr")?;
    }
    for (i, line) in run.text.split('\n').enumerate() {
        if i > 0 {
            w.empty("w:br", &[])?;
        }
        if !line.is_empty() {
            w.text_element("w:t", &[("xml:space", "preserve")], line)?;
        }
    }
    w.end("w:r")
}

fn write_table(w: &mut XmlOut, rows: &[Vec<String>], header: bool) -> Result<(), DocxError> {
    let columns = rows.iter().map(|r| r.len()).max().unwrap_or(1).max(1);
    // 9360 twips is the text width of a letter page with one-inch margins.
    let col_width = (9360 / columns).to_string();

    w.start("w:tbl", &[])?;
    w.start("w:tblPr", &[])?;
    w.empty("w:tblStyle", &[("w:val", "TableGrid")])?;
    w.empty("w:tblW", &[("w:w", "0"), ("w:type", "auto")])?;
    w.end("w:tblPr")?;

    w.start("w:tblGrid", &[])?;
    for _ in 0..columns {
        w.empty("w:gridCol", &[("w:w", &col_width)])?;
    }
    w.end("w:tblGrid")?;

    for (row_idx, row) in rows.iter().enumerate() {
        let is_header = header && row_idx == 0;
        w.start("w:tr", &[])?;
        if is_header {
            w.start("w:trPr", &[])?;
            w.empty("w:tblHeader", &[])?;
            w.end("w:trPr")?;
        }
        for col in 0..columns {
            let text = row.get(col).map(String::as_str).unwrap_or("");
            w.start("w:tc", &[])?;
            w.start("w:tcPr", &[])?;
            w.empty("w:tcW", &[("w:w", &col_width), ("w:type", "dxa")])?;
            w.end("w:tcPr")?;
            let run = Run::styled(
                text,
                RunStyle {
                    bold: is_header,
                    ..RunStyle::default()
                },
            );
            write_paragraph(w, None, None, None, std::slice::from_ref(&run))?;
            w.end("w:tc")?;
        }
        w.end("w:tr")?;
    }
    w.end("w:tbl")?;

    // Word requires a paragraph between adjacent tables and before sectPr.
    w.start("w:p", &[])?;
    w.end("w:p")
}

/// Thin wrapper over [`quick_xml::Writer`] that maps errors into [`DocxError`].
struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn new() -> Result<Self, DocxError> {
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))
            .map_err(xml_err)?;
        Ok(Self { writer })
    }

    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), DocxError> {
        let el = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.writer.write_event(Event::Start(el)).map_err(xml_err)
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), DocxError> {
        let el = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.writer.write_event(Event::Empty(el)).map_err(xml_err)
    }

    fn end(&mut self, name: &str) -> Result<(), DocxError> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_err)
    }

    fn text_element(
        &mut self,
        name: &str,
        attrs: &[(&str, &str)],
        text: &str,
    ) -> Result<(), DocxError> {
        self.start(name, attrs)?;
        self.writer
            .write_event(Event::Text(BytesText::new(&xml_safe_text(text))))
            .map_err(xml_err)?;
        self.end(name)
    }

    fn finish(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/><Override PartName="/word/numbering.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.numbering+xml"/><Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/></Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/></Relationships>"#;

const DOCUMENT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/numbering" Target="numbering.xml"/></Relationships>"#;

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:docDefaults><w:rPrDefault><w:rPr><w:rFonts w:ascii="Calibri" w:hAnsi="Calibri" w:eastAsia="Calibri" w:cs="Calibri"/><w:sz w:val="22"/><w:szCs w:val="22"/><w:lang w:val="en-US"/></w:rPr></w:rPrDefault><w:pPrDefault><w:pPr><w:spacing w:after="160" w:line="259" w:lineRule="auto"/></w:pPr></w:pPrDefault></w:docDefaults><w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/><w:qFormat/></w:style><w:style w:type="paragraph" w:styleId="Title"><w:name w:val="Title"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/><w:pPr><w:spacing w:after="240"/></w:pPr><w:rPr><w:sz w:val="56"/><w:szCs w:val="56"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading1"><w:name w:val="heading 1"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/><w:pPr><w:keepNext/><w:spacing w:before="240" w:after="80"/><w:outlineLvl w:val="0"/></w:pPr><w:rPr><w:b/><w:color w:val="2F5496"/><w:sz w:val="32"/><w:szCs w:val="32"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading2"><w:name w:val="heading 2"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/><w:pPr><w:keepNext/><w:spacing w:before="160" w:after="80"/><w:outlineLvl w:val="1"/></w:pPr><w:rPr><w:b/><w:color w:val="2F5496"/><w:sz w:val="28"/><w:szCs w:val="28"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading3"><w:name w:val="heading 3"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/><w:pPr><w:keepNext/><w:spacing w:before="160" w:after="40"/><w:outlineLvl w:val="2"/></w:pPr><w:rPr><w:b/><w:color w:val="1F3763"/><w:sz w:val="24"/><w:szCs w:val="24"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading4"><w:name w:val="heading 4"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/><w:pPr><w:keepNext/><w:outlineLvl w:val="3"/></w:pPr><w:rPr><w:b/><w:i/><w:color w:val="2F5496"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading5"><w:name w:val="heading 5"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/><w:pPr><w:keepNext/><w:outlineLvl w:val="4"/></w:pPr><w:rPr><w:color w:val="2F5496"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="Heading6"><w:name w:val="heading 6"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/><w:pPr><w:keepNext/><w:outlineLvl w:val="5"/></w:pPr><w:rPr><w:i/><w:color w:val="1F3763"/></w:rPr></w:style><w:style w:type="paragraph" w:styleId="ListParagraph"><w:name w:val="List Paragraph"/><w:basedOn w:val="Normal"/><w:qFormat/><w:pPr><w:spacing w:after="40"/><w:contextualSpacing/></w:pPr></w:style><w:style w:type="table" w:styleId="TableGrid"><w:name w:val="Table Grid"/><w:tblPr><w:tblBorders><w:top w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:left w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:bottom w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:right w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:insideH w:val="single" w:sz="4" w:space="0" w:color="auto"/><w:insideV w:val="single" w:sz="4" w:space="0" w:color="auto"/></w:tblBorders></w:tblPr></w:style></w:styles>"#;

const NUMBERING: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:numbering xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:abstractNum w:abstractNumId="0"><w:multiLevelType w:val="hybridMultilevel"/><w:lvl w:ilvl="0"><w:start w:val="1"/><w:numFmt w:val="bullet"/><w:lvlText w:val="•"/><w:lvlJc w:val="left"/><w:pPr><w:ind w:left="720" w:hanging="360"/></w:pPr></w:lvl><w:lvl w:ilvl="1"><w:start w:val="1"/><w:numFmt w:val="bullet"/><w:lvlText w:val="o"/><w:lvlJc w:val="left"/><w:pPr><w:ind w:left="1440" w:hanging="360"/></w:pPr></w:lvl><w:lvl w:ilvl="2"><w:start w:val="1"/><w:numFmt w:val="bullet"/><w:lvlText w:val="▪"/><w:lvlJc w:val="left"/><w:pPr><w:ind w:left="2160" w:hanging="360"/></w:pPr></w:lvl></w:abstractNum><w:abstractNum w:abstractNumId="1"><w:multiLevelType w:val="hybridMultilevel"/><w:lvl w:ilvl="0"><w:start w:val="1"/><w:numFmt w:val="decimal"/><w:lvlText w:val="%1."/><w:lvlJc w:val="left"/><w:pPr><w:ind w:left="720" w:hanging="360"/></w:pPr></w:lvl><w:lvl w:ilvl="1"><w:start w:val="1"/><w:numFmt w:val="lowerLetter"/><w:lvlText w:val="%2."/><w:lvlJc w:val="left"/><w:pPr><w:ind w:left="1440" w:hanging="360"/></w:pPr></w:lvl><w:lvl w:ilvl="2"><w:start w:val="1"/><w:numFmt w:val="lowerRoman"/><w:lvlText w:val="%3."/><w:lvlJc w:val="right"/><w:pPr><w:ind w:left="2160" w:hanging="180"/></w:pPr></w:lvl></w:abstractNum><w:num w:numId="1"><w:abstractNumId w:val="0"/></w:num><w:num w:numId="2"><w:abstractNumId w:val="1"/></w:num></w:numbering>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn read_part(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut out = String::new();
        entry.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn package_contains_required_parts() {
        let mut doc = Document::new();
        doc.heading("Hello", 1).unwrap();
        let bytes = doc.to_bytes().unwrap();

        let archive = zip::ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        for part in [
            "[Content_Types].xml",
            "_rels/.rels",
            "word/document.xml",
            "word/styles.xml",
            "word/numbering.xml",
            "word/_rels/document.xml.rels",
            "docProps/core.xml",
        ] {
            assert!(names.contains(&part), "missing part {}", part);
        }
    }

    #[test]
    fn text_is_escaped_and_styled() {
        let mut doc = Document::new();
        doc.paragraph(
            vec![Run::styled(
                "Fish & <Chips>",
                RunStyle {
                    bold: true,
                    color: Some("ff0000".to_string()),
                    size_pt: Some(14.0),
                    ..RunStyle::default()
                },
            )],
            Alignment::Center,
        );
        let xml = read_part(&doc.to_bytes().unwrap(), "word/document.xml");
        assert!(xml.contains("Fish &amp; &lt;Chips&gt;"));
        assert!(xml.contains("<w:b/>"));
        assert!(xml.contains(r#"<w:color w:val="ff0000"/>"#));
        assert!(xml.contains(r#"<w:sz w:val="28"/>"#));
        assert!(xml.contains(r#"<w:jc w:val="center"/>"#));
    }

    #[test]
    fn newlines_become_breaks() {
        let mut doc = Document::new();
        doc.paragraph(vec![Run::plain("line one\nline two")], Alignment::Left);
        let xml = read_part(&doc.to_bytes().unwrap(), "word/document.xml");
        assert!(xml.contains("line one</w:t><w:br/><w:t xml:space=\"preserve\">line two"));
    }

    #[test]
    fn heading_levels_map_to_styles() {
        let mut doc = Document::new();
        doc.heading("Title", 0).unwrap();
        doc.heading("Section", 2).unwrap();
        assert!(doc.heading("Too deep", 7).is_err());
        let xml = read_part(&doc.to_bytes().unwrap(), "word/document.xml");
        assert!(xml.contains(r#"<w:pStyle w:val="Title"/>"#));
        assert!(xml.contains(r#"<w:pStyle w:val="Heading2"/>"#));
    }

    #[test]
    fn table_rows_are_padded_to_widest() {
        let mut doc = Document::new();
        doc.table(
            vec![
                vec!["Name".into(), "Role".into()],
                vec!["Ada".into()],
            ],
            true,
        )
        .unwrap();
        let xml = read_part(&doc.to_bytes().unwrap(), "word/document.xml");
        assert_eq!(xml.matches("<w:tc>").count(), 4);
        assert!(xml.contains("<w:tblHeader/>"));
        assert!(doc.table(vec![], false).is_err());
    }

    #[test]
    fn list_items_reference_numbering() {
        let mut doc = Document::new();
        doc.list_item(vec![Run::plain("first")], false, 0).unwrap();
        doc.list_item(vec![Run::plain("second")], true, 1).unwrap();
        let xml = read_part(&doc.to_bytes().unwrap(), "word/document.xml");
        assert!(xml.contains(r#"<w:numId w:val="1"/>"#));
        assert!(xml.contains(r#"<w:numId w:val="2"/>"#));
        assert!(xml.contains(r#"<w:ilvl w:val="1"/>"#));
    }

    #[test]
    fn invalid_color_is_rejected() {
        let style = RunStyle {
            color: Some("#12345".to_string()),
            ..RunStyle::default()
        };
        assert!(style.validated().is_err());

        let style = RunStyle {
            color: Some("#1f3763".to_string()),
            ..RunStyle::default()
        };
        assert_eq!(style.validated().unwrap().color.as_deref(), Some("1F3763"));
    }

    #[test]
    fn content_bytes_counts_text_and_structure() {
        let mut doc = Document::new();
        doc.heading("abc", 1).unwrap();
        doc.paragraph(vec![Run::plain("defg")], Alignment::Left);
        doc.page_break();
        let expected = 3 * BLOCK_OVERHEAD + 2 * RUN_OVERHEAD + 7;
        assert_eq!(doc.content_bytes(), expected);
        assert_eq!(doc.blocks().len(), 3);
    }

    #[test]
    fn empty_table_cells_still_cost_space() {
        let rows = vec![vec![String::new(); 10]; 10];
        let block = Block::Table { rows, header: false };
        assert_eq!(block_footprint(&block), BLOCK_OVERHEAD + 100 * RUN_OVERHEAD);
        assert_eq!(block_footprint(&Block::PageBreak), BLOCK_OVERHEAD);
    }

    #[test]
    fn control_characters_are_dropped_from_xml() {
        let mut doc = Document::new();
        doc.title = Some("Memo\u{1}".to_string());
        doc.paragraph(vec![Run::plain("bell\u{7}form\u{c}feed\ttab")], Alignment::Left);
        doc.table(vec![vec!["cell\u{0}".into()]], false).unwrap();
        let bytes = doc.to_bytes().unwrap();

        let xml = read_part(&bytes, "word/document.xml");
        assert!(xml.contains("bellformfeed\ttab"));
        assert!(xml.contains(">cell<"));
        assert!(!xml.chars().any(|c| c < '\u{20}' && !matches!(c, '\t' | '\n' | '\r')));
        let core = read_part(&bytes, "docProps/core.xml");
        assert!(core.contains("<dc:title>Memo</dc:title>"));
    }

    #[test]
    fn add_validates_blocks() {
        let mut doc = Document::new();
        assert!(doc
            .add(Block::ListItem {
                runs: vec![Run::plain("x")],
                ordered: false,
                level: 3,
            })
            .is_err());
        assert!(doc.add(Block::Table { rows: vec![vec![]], header: false }).is_err());
        assert!(doc.is_empty());
        doc.add(Block::PageBreak).unwrap();
        assert_eq!(doc.blocks().len(), 1);
    }

    #[test]
    fn core_properties_carry_title() {
        let mut doc = Document::new();
        doc.title = Some("Quarterly Report".to_string());
        let bytes = doc.to_bytes().unwrap();
        let core = read_part(&bytes, "docProps/core.xml");
        assert!(core.contains("<dc:title>Quarterly Report</dc:title>"));
        assert!(core.contains("<dc:creator>docforge</dc:creator>"));
    }
}
