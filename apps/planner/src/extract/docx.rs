// A .docx file is a ZIP archive of XML parts; docx-rs gives a typed tree:
//   Document → Paragraph | Table → Run → Text
// Text is collected per paragraph, tables are walked cell by cell.

use docx_rs::{
    DocumentChild, Paragraph, ParagraphChild, RunChild, Table, TableCellContent, TableChild,
    TableRowChild,
};

/// Extracts the raw text of a .docx document, one paragraph per line.
pub(super) fn document_text(bytes: &[u8]) -> Result<String, String> {
    let docx = docx_rs::read_docx(bytes).map_err(|e| format!("DOCX decode error: {e:?}"))?;

    let mut paragraphs: Vec<String> = Vec::new();
    for child in &docx.document.children {
        match child {
            DocumentChild::Paragraph(para) => push_paragraph(&mut paragraphs, para),
            DocumentChild::Table(table) => push_table(&mut paragraphs, table),
            _ => {}
        }
    }

    Ok(paragraphs.join("\n"))
}

fn push_paragraph(out: &mut Vec<String>, para: &Paragraph) {
    let text = paragraph_text(para);
    if !text.trim().is_empty() {
        out.push(text);
    }
}

fn push_table(out: &mut Vec<String>, table: &Table) {
    for TableChild::TableRow(row) in &table.rows {
        for TableRowChild::TableCell(cell) in &row.cells {
            for content in &cell.children {
                match content {
                    TableCellContent::Paragraph(para) => push_paragraph(out, para),
                    TableCellContent::Table(inner) => push_table(out, inner),
                    _ => {}
                }
            }
        }
    }
}

fn paragraph_text(para: &Paragraph) -> String {
    let mut parts = Vec::new();
    for child in &para.children {
        if let ParagraphChild::Run(run) = child {
            for rc in &run.children {
                match rc {
                    RunChild::Text(t) => parts.push(t.text.clone()),
                    RunChild::Tab(_) => parts.push("\t".to_string()),
                    _ => {}
                }
            }
        }
    }
    parts.join("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use docx_rs::{Docx, Run, TableCell, TableRow};

    fn pack(docx: Docx) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        docx.build().pack(&mut buf).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_paragraphs_are_joined_by_newline() {
        let bytes = pack(
            Docx::new()
                .add_paragraph(Paragraph::new().add_run(Run::new().add_text("Bloque 1")))
                .add_paragraph(Paragraph::new())
                .add_paragraph(
                    Paragraph::new()
                        .add_run(Run::new().add_text("Los seres "))
                        .add_run(Run::new().add_text("vivos")),
                ),
        );
        assert_eq!(document_text(&bytes).unwrap(), "Bloque 1\nLos seres vivos");
    }

    #[test]
    fn test_table_cells_are_included() {
        let table = Table::new(vec![TableRow::new(vec![
            TableCell::new().add_paragraph(Paragraph::new().add_run(Run::new().add_text("CE 1"))),
            TableCell::new().add_paragraph(Paragraph::new().add_run(Run::new().add_text("CE 2"))),
        ])]);
        let bytes = pack(
            Docx::new()
                .add_paragraph(Paragraph::new().add_run(Run::new().add_text("Criterios")))
                .add_table(table),
        );
        assert_eq!(document_text(&bytes).unwrap(), "Criterios\nCE 1\nCE 2");
    }
}
