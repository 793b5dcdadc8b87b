//! Conversion between editor HTML and Word documents.
//!
//! The web client edits documents as HTML. `export` turns that HTML into a
//! [`Document`] ([`html_to_document`]); `import` renders an uploaded docx
//! back into HTML the editor can load ([`docx_to_html`]).
//!
//! Only the structural subset an editor produces is understood: headings,
//! paragraphs, bold/italic/underline, line breaks, nested lists and simple
//! tables. Anything else contributes its text and nothing more.
//!
//! Editor HTML is not XML (`<br>` has no end tag, `&nbsp;` is not an XML
//! entity), so the `quick-xml` reader runs with end-name checks disabled and
//! entities resolved leniently.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use thiserror::Error;

use crate::docx::{Alignment, Block, DocxError, Document, Run, RunStyle};
use crate::extract::{read_package_part, ExtractError};

#[derive(Debug, Error)]
pub enum HtmlError {
    #[error("malformed HTML: {0}")]
    Parse(String),
    #[error("unreadable document: {0}")]
    Package(String),
    #[error(transparent)]
    Docx(#[from] DocxError),
}

impl From<ExtractError> for HtmlError {
    fn from(err: ExtractError) -> Self {
        HtmlError::Package(err.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// HTML → Document
// ═══════════════════════════════════════════════════════════════════════

/// Build a [`Document`] from editor HTML.
pub fn html_to_document(html: &str) -> Result<Document, HtmlError> {
    let mut reader = Reader::from_str(html);
    {
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
    }
    let mut builder = HtmlBuilder::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => builder.open(&e)?,
            Ok(Event::Empty(e)) => {
                builder.open(&e)?;
                builder.close(&tag_name(e.local_name().as_ref()))?;
            }
            Ok(Event::End(e)) => builder.close(&tag_name(e.local_name().as_ref()))?,
            Ok(Event::Text(t)) => builder.text(&decode_text(&t)),
            Ok(Event::CData(t)) => builder.text(&String::from_utf8_lossy(&t)),
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(HtmlError::Parse(format!(
                    "at byte {}: {}",
                    reader.error_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    builder.finish()
}

#[derive(Debug)]
enum PendingKind {
    Heading(u8),
    Paragraph(Alignment),
    ListItem { ordered: bool, level: u8 },
}

#[derive(Debug)]
struct PendingBlock {
    kind: PendingKind,
    runs: Vec<Run>,
}

#[derive(Debug, Default)]
struct TableState {
    rows: Vec<Vec<String>>,
    row: Option<Vec<String>>,
    cell: Option<String>,
    header: bool,
}

#[derive(Debug, Default)]
struct HtmlBuilder {
    doc: Document,
    block: Option<PendingBlock>,
    lists: Vec<bool>,
    table: Option<TableState>,
    bold: usize,
    italic: usize,
    underline: usize,
    skip: usize,
    in_title: bool,
}

impl HtmlBuilder {
    fn open(&mut self, e: &BytesStart) -> Result<(), HtmlError> {
        let tag = tag_name(e.local_name().as_ref());
        match tag.as_str() {
            "script" | "style" => self.skip += 1,
            "title" => self.in_title = true,
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                if self.table.is_none() {
                    self.flush();
                    let level = tag[1..].parse().unwrap_or(1);
                    self.begin(PendingKind::Heading(level));
                }
            }
            "p" | "div" | "blockquote" | "pre" => {
                if self.table.is_none() && !self.in_fresh_list_item() {
                    self.flush();
                    self.begin(PendingKind::Paragraph(alignment_of(e)));
                }
            }
            "ul" | "ol" => {
                self.flush();
                self.lists.push(tag == "ol");
            }
            "li" => {
                self.flush();
                let ordered = self.lists.last().copied().unwrap_or(false);
                let level = self.lists.len().saturating_sub(1).min(2) as u8;
                self.begin(PendingKind::ListItem { ordered, level });
            }
            "strong" | "b" => self.bold += 1,
            "em" | "i" => self.italic += 1,
            "u" | "ins" => self.underline += 1,
            "br" => self.line_break(),
            "table" => {
                self.flush();
                self.table = Some(TableState::default());
            }
            "tr" => {
                if let Some(table) = self.table.as_mut() {
                    if let Some(row) = table.row.take() {
                        table.rows.push(row);
                    }
                    table.row = Some(Vec::new());
                }
            }
            "td" | "th" => {
                if let Some(table) = self.table.as_mut() {
                    if tag == "th" && table.rows.is_empty() {
                        table.header = true;
                    }
                    if table.row.is_none() {
                        table.row = Some(Vec::new());
                    }
                    table.cell = Some(String::new());
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, tag: &str) -> Result<(), HtmlError> {
        match tag {
            "script" | "style" => self.skip = self.skip.saturating_sub(1),
            "title" => self.in_title = false,
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "div" | "blockquote" | "pre" => {
                if self.table.is_none() {
                    self.flush();
                }
            }
            "p" => {
                let in_list_item = matches!(
                    self.block,
                    Some(PendingBlock {
                        kind: PendingKind::ListItem { .. },
                        ..
                    })
                );
                if self.table.is_none() && !in_list_item {
                    self.flush();
                }
            }
            "li" => self.flush(),
            "ul" | "ol" => {
                self.flush();
                self.lists.pop();
            }
            "strong" | "b" => self.bold = self.bold.saturating_sub(1),
            "em" | "i" => self.italic = self.italic.saturating_sub(1),
            "u" | "ins" => self.underline = self.underline.saturating_sub(1),
            "td" | "th" => {
                if let Some(table) = self.table.as_mut() {
                    if let Some(cell) = table.cell.take() {
                        let text = collapse_whitespace(&cell).trim().to_string();
                        table.row.get_or_insert_with(Vec::new).push(text);
                    }
                }
            }
            "tr" => {
                if let Some(table) = self.table.as_mut() {
                    if let Some(row) = table.row.take() {
                        table.rows.push(row);
                    }
                }
            }
            "table" => self.finish_table()?,
            _ => {}
        }
        Ok(())
    }

    fn text(&mut self, raw: &str) {
        if self.skip > 0 {
            return;
        }
        if self.in_title {
            let title = collapse_whitespace(raw).trim().to_string();
            if !title.is_empty() {
                self.doc.title = Some(title);
            }
            return;
        }
        if let Some(table) = self.table.as_mut() {
            if let Some(cell) = table.cell.as_mut() {
                cell.push_str(raw);
            }
            return;
        }

        let text = collapse_whitespace(raw);
        if self.block.is_none() {
            if text.trim().is_empty() {
                return;
            }
            self.begin(PendingKind::Paragraph(Alignment::Left));
        }
        self.push_run(text);
    }

    fn line_break(&mut self) {
        if let Some(table) = self.table.as_mut() {
            if let Some(cell) = table.cell.as_mut() {
                cell.push(' ');
            }
            return;
        }
        if self.block.is_some() {
            self.push_run("\n".to_string());
        }
    }

    fn push_run(&mut self, text: String) {
        let style = RunStyle {
            bold: self.bold > 0,
            italic: self.italic > 0,
            underline: self.underline > 0,
            ..RunStyle::default()
        };
        let Some(block) = self.block.as_mut() else {
            return;
        };
        match block.runs.last_mut() {
            Some(last) if last.style == style => last.text.push_str(&text),
            _ => block.runs.push(Run::styled(text, style)),
        }
    }

    fn begin(&mut self, kind: PendingKind) {
        self.block = Some(PendingBlock {
            kind,
            runs: Vec::new(),
        });
    }

    /// An `<li>` that has not received text yet absorbs a leading `<p>`.
    fn in_fresh_list_item(&self) -> bool {
        matches!(
            &self.block,
            Some(PendingBlock {
                kind: PendingKind::ListItem { .. },
                runs,
            }) if runs.is_empty()
        )
    }

    fn flush(&mut self) {
        let Some(block) = self.block.take() else {
            return;
        };
        let runs = trim_runs(block.runs);
        if runs.is_empty() {
            return;
        }
        let block = match block.kind {
            PendingKind::Heading(level) => Block::Heading { level, runs },
            PendingKind::Paragraph(align) => Block::Paragraph { runs, align },
            PendingKind::ListItem { ordered, level } => Block::ListItem {
                runs,
                ordered,
                level,
            },
        };
        self.doc.push(block);
    }

    fn finish_table(&mut self) -> Result<(), HtmlError> {
        let Some(mut table) = self.table.take() else {
            return Ok(());
        };
        if let Some(row) = table.row.take() {
            table.rows.push(row);
        }
        table.rows.retain(|r| !r.is_empty());
        if !table.rows.is_empty() {
            self.doc.table(table.rows, table.header)?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Document, HtmlError> {
        self.flush();
        self.finish_table()?;
        Ok(self.doc)
    }
}

fn tag_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

fn decode_text(t: &BytesText) -> String {
    match t.unescape_with(html_entity) {
        Ok(text) => text.into_owned(),
        Err(_) => String::from_utf8_lossy(t).into_owned(),
    }
}

fn html_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => "\u{a0}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "bull" => "\u{2022}",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "euro" => "\u{20ac}",
        _ => return None,
    })
}

/// Read `style="text-align: …"` or the legacy `align` attribute.
fn alignment_of(e: &BytesStart) -> Alignment {
    for attr in e.html_attributes().flatten() {
        let key = tag_name(attr.key.local_name().as_ref());
        let value = String::from_utf8_lossy(&attr.value).to_ascii_lowercase();
        let align = match key.as_str() {
            "align" => Some(value.trim().to_string()),
            "style" => value.split(';').find_map(|decl| {
                let (prop, val) = decl.split_once(':')?;
                (prop.trim() == "text-align").then(|| val.trim().to_string())
            }),
            _ => None,
        };
        if let Some(a) = align {
            return Alignment::parse(&a).unwrap_or(Alignment::Left);
        }
    }
    Alignment::Left
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_space = false;
    for c in s.chars() {
        if c.is_ascii_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Drop leading/trailing spaces of the block and any runs left empty.
fn trim_runs(mut runs: Vec<Run>) -> Vec<Run> {
    if let Some(first) = runs.first_mut() {
        first.text = first.text.trim_start_matches(' ').to_string();
    }
    if let Some(last) = runs.last_mut() {
        last.text = last.text.trim_end_matches([' ', '\n']).to_string();
    }
    runs.retain(|r| !r.text.is_empty());
    runs
}

// ═══════════════════════════════════════════════════════════════════════
// docx → HTML
// ═══════════════════════════════════════════════════════════════════════

/// Render the body of a docx package as editor HTML.
pub fn docx_to_html(bytes: &[u8]) -> Result<String, HtmlError> {
    let xml = read_package_part(bytes, "word/document.xml")?;
    let numbering = read_package_part(bytes, "word/numbering.xml")
        .map(|xml| parse_numbering(&xml))
        .unwrap_or_default();

    let mut renderer = HtmlRenderer {
        numbering,
        ..HtmlRenderer::default()
    };
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => renderer.open(&e, false),
            Ok(Event::Empty(e)) => renderer.open(&e, true),
            Ok(Event::End(e)) => renderer.close(e.local_name().as_ref()),
            Ok(Event::Text(t)) => {
                if renderer.in_text {
                    let text = t
                        .unescape()
                        .map_err(|e| HtmlError::Package(e.to_string()))?;
                    renderer.push_text(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(HtmlError::Package(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    renderer.close_lists(0);
    Ok(renderer.html)
}

#[derive(Debug, Default)]
struct ParaState {
    style: Option<String>,
    align: Option<String>,
    num_id: Option<String>,
    ilvl: usize,
    body: String,
}

#[derive(Debug, Default)]
struct RunState {
    bold: bool,
    italic: bool,
    underline: bool,
    text: String,
}

#[derive(Debug, Default)]
struct HtmlRenderer {
    html: String,
    /// `numId` → ordered list?
    numbering: HashMap<String, bool>,
    /// Open list elements, innermost last; `true` for `<ol>`.
    lists: Vec<bool>,
    para: Option<ParaState>,
    run: Option<RunState>,
    in_ppr: bool,
    in_rpr: bool,
    in_text: bool,
    /// Current table row is marked as a repeating header.
    header_row: bool,
}

impl HtmlRenderer {
    fn open(&mut self, e: &BytesStart, empty: bool) {
        match e.local_name().as_ref() {
            b"p" if !empty => self.para = Some(ParaState::default()),
            b"pPr" if !empty => self.in_ppr = true,
            b"pStyle" if self.in_ppr => {
                if let Some(p) = self.para.as_mut() {
                    p.style = w_val(e);
                }
            }
            b"jc" if self.in_ppr => {
                if let Some(p) = self.para.as_mut() {
                    p.align = w_val(e);
                }
            }
            b"ilvl" if self.in_ppr => {
                if let Some(p) = self.para.as_mut() {
                    p.ilvl = w_val(e).and_then(|v| v.parse().ok()).unwrap_or(0);
                }
            }
            b"numId" if self.in_ppr => {
                if let Some(p) = self.para.as_mut() {
                    p.num_id = w_val(e);
                }
            }
            b"r" if !empty => self.run = Some(RunState::default()),
            b"rPr" if !empty && self.run.is_some() => self.in_rpr = true,
            b"b" | b"i" | b"u" if self.in_rpr => {
                let on = !matches!(
                    w_val(e).as_deref(),
                    Some("0") | Some("false") | Some("none")
                );
                if let Some(run) = self.run.as_mut() {
                    match e.local_name().as_ref() {
                        b"b" => run.bold = on,
                        b"i" => run.italic = on,
                        _ => run.underline = on,
                    }
                }
            }
            b"t" if !empty => self.in_text = true,
            b"br" => self.push_text("\n"),
            b"tab" if self.run.is_some() => self.push_text("\t"),
            b"tbl" => {
                self.close_lists(0);
                self.html.push_str("<table>");
            }
            b"tr" => {
                self.header_row = false;
                self.html.push_str("<tr>");
            }
            b"tblHeader" => self.header_row = true,
            b"tc" => self.html.push_str(if self.header_row { "<th>" } else { "<td>" }),
            _ => {}
        }
    }

    fn close(&mut self, name: &[u8]) {
        match name {
            b"pPr" => self.in_ppr = false,
            b"rPr" => self.in_rpr = false,
            b"t" => self.in_text = false,
            b"r" => self.finish_run(),
            b"p" => self.finish_paragraph(),
            b"tc" => self.html.push_str(if self.header_row { "</th>" } else { "</td>" }),
            b"tr" => {
                self.header_row = false;
                self.html.push_str("</tr>");
            }
            b"tbl" => self.html.push_str("</table>"),
            _ => {}
        }
    }

    fn push_text(&mut self, text: &str) {
        if let Some(run) = self.run.as_mut() {
            run.text.push_str(text);
        }
    }

    fn finish_run(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };
        self.in_rpr = false;
        if run.text.is_empty() {
            return;
        }
        let mut html = escape(run.text.as_str()).replace('\n', "<br>");
        if run.underline {
            html = format!("<u>{}</u>", html);
        }
        if run.italic {
            html = format!("<em>{}</em>", html);
        }
        if run.bold {
            html = format!("<strong>{}</strong>", html);
        }
        if let Some(p) = self.para.as_mut() {
            p.body.push_str(&html);
        }
    }

    fn finish_paragraph(&mut self) {
        let Some(p) = self.para.take() else {
            return;
        };

        if let Some(num_id) = p.num_id.as_deref().filter(|id| *id != "0") {
            let ordered = self.numbering.get(num_id).copied().unwrap_or(false);
            self.open_list_level(p.ilvl.min(8) + 1, ordered);
            self.html.push_str("<li>");
            self.html.push_str(&p.body);
            self.html.push_str("</li>");
            return;
        }

        self.close_lists(0);
        if p.body.trim().is_empty() {
            return;
        }
        let tag = match p.style.as_deref() {
            Some("Title") => "h1".to_string(),
            Some(s) if s.to_ascii_lowercase().starts_with("heading") => {
                match s[7..].trim().parse::<u8>() {
                    Ok(n @ 1..=6) => format!("h{}", n),
                    _ => "p".to_string(),
                }
            }
            _ => "p".to_string(),
        };
        let style = match p.align.as_deref() {
            Some("center") => " style=\"text-align: center\"",
            Some("right") | Some("end") => " style=\"text-align: right\"",
            Some("both") | Some("distribute") => " style=\"text-align: justify\"",
            _ => "",
        };
        self.html
            .push_str(&format!("<{tag}{style}>{}</{tag}>", p.body));
    }

    fn open_list_level(&mut self, depth: usize, ordered: bool) {
        self.close_lists(depth);
        if self.lists.len() == depth && self.lists.last() != Some(&ordered) {
            self.close_lists(depth - 1);
        }
        while self.lists.len() < depth {
            self.html.push_str(if ordered { "<ol>" } else { "<ul>" });
            self.lists.push(ordered);
        }
    }

    /// Close open lists until at most `depth` remain.
    fn close_lists(&mut self, depth: usize) {
        while self.lists.len() > depth {
            if let Some(ordered) = self.lists.pop() {
                self.html.push_str(if ordered { "</ol>" } else { "</ul>" });
            }
        }
    }
}

fn w_val(e: &BytesStart) -> Option<String> {
    e.try_get_attribute("w:val")
        .ok()
        .flatten()
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn attr(e: &BytesStart, name: &str) -> Option<String> {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// Map each `w:numId` to whether its first level is numbered (not bulleted).
fn parse_numbering(xml: &[u8]) -> HashMap<String, bool> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut abstract_ordered: HashMap<String, bool> = HashMap::new();
    let mut num_to_abstract: Vec<(String, String)> = Vec::new();
    let mut current_abstract: Option<String> = None;
    let mut current_level: Option<String> = None;
    let mut current_num: Option<String> = None;

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) | Err(_) => break,
            Ok(event) => event,
        };
        match event {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"abstractNum" => current_abstract = attr(&e, "w:abstractNumId"),
                b"lvl" => current_level = attr(&e, "w:ilvl"),
                b"numFmt" if current_level.as_deref() == Some("0") => {
                    if let Some(id) = current_abstract.clone() {
                        let ordered = w_val(&e).map(|f| f != "bullet").unwrap_or(false);
                        abstract_ordered.insert(id, ordered);
                    }
                }
                b"num" => current_num = attr(&e, "w:numId"),
                b"abstractNumId" => {
                    if let (Some(num), Some(abs)) = (current_num.clone(), w_val(&e)) {
                        num_to_abstract.push((num, abs));
                    }
                }
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"abstractNum" => current_abstract = None,
                b"lvl" => current_level = None,
                b"num" => current_num = None,
                _ => {}
            },
            _ => {}
        }
        buf.clear();
    }

    num_to_abstract
        .into_iter()
        .map(|(num, abs)| {
            let ordered = abstract_ordered.get(&abs).copied().unwrap_or(false);
            (num, ordered)
        })
        .collect()
}
