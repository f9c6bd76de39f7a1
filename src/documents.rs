// documents.rs
// PDF documents rendered through the typst CLI: list exports and invoices.

use std::process::Stdio;

use anyhow::{Context, Result, bail};
use rand::{Rng, distr::Alphanumeric};
use rust_decimal::Decimal;
use tokio::{fs, process::Command};

/// Quotes a value as a typst string literal.
fn lit(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn content(value: &str) -> String {
    format!("[#{}]", lit(value))
}

const PREAMBLE: &str = "#set page(paper: \"us-letter\", margin: 1.5cm)\n#set text(size: 10pt)\n";

/// Title plus a single striped table.
pub fn table_document(title: &str, headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut src = String::from(PREAMBLE);
    src.push_str(&format!("#heading(level: 1)[#{}]\n", lit(title)));
    src.push_str(&format!(
        "#table(\n  columns: {},\n  fill: (_, y) => if y == 0 {{ luma(220) }} else if calc.even(y) {{ luma(245) }},\n",
        headers.len().max(1)
    ));
    let header_cells: Vec<String> = headers
        .iter()
        .map(|h| format!("[*#{}*]", lit(h)))
        .collect();
    src.push_str(&format!("  table.header({}),\n", header_cells.join(", ")));
    for row in rows {
        let cells: Vec<String> = row.iter().map(|c| content(c)).collect();
        src.push_str(&format!("  {},\n", cells.join(", ")));
    }
    src.push_str(")\n");
    src
}

/// Party block printed on an invoice (customer or supplier).
#[derive(Debug, Clone, Default)]
pub struct InvoiceParty {
    pub name: String,
    pub address: String,
    pub email: String,
    pub contact: String,
}

#[derive(Debug, Clone)]
pub struct OutgoingInvoice {
    pub number: String,
    pub date: String,
    pub customer: InvoiceParty,
    pub product: String,
    pub quantity: i64,
    pub unit_price: Decimal,
}

impl OutgoingInvoice {
    pub fn total(&self) -> Result<Decimal> {
        self.unit_price
            .checked_mul(Decimal::from(self.quantity))
            .map(|total| total.round_dp(2))
            .with_context(|| format!("invoice {} total overflows", self.number))
    }

    pub fn to_typst(&self) -> Result<String> {
        let total = self.total()?;
        let mut src = String::from(PREAMBLE);
        src.push_str("#align(center)[#text(size: 20pt, weight: \"bold\")[INVOICE]]\n\n");
        src.push_str(&format!("Invoice ID: #{}\\\n", lit(&self.number)));
        src.push_str(&format!("Date: #{}\n\n", lit(&self.date)));
        src.push_str("*Customer:*\\\n");
        src.push_str(&format!("#{}\\\n", lit(&self.customer.name)));
        if !self.customer.address.is_empty() {
            src.push_str(&format!("#{}\\\n", lit(&self.customer.address)));
        }
        if !self.customer.email.is_empty() {
            src.push_str(&format!("Email: #{}\\\n", lit(&self.customer.email)));
        }
        if !self.customer.contact.is_empty() {
            src.push_str(&format!("Contact: #{}\n", lit(&self.customer.contact)));
        }
        src.push('\n');
        src.push_str("#table(\n  columns: (1fr, auto, auto, auto),\n");
        src.push_str("  table.header([*Product*], [*Quantity*], [*Unit Price*], [*Total*]),\n");
        src.push_str(&format!(
            "  {}, {}, {}, {},\n)\n",
            content(&self.product),
            content(&self.quantity.to_string()),
            content(&format!("{:.2}", self.unit_price)),
            content(&format!("{total:.2}")),
        ));
        src.push_str(&format!(
            "\n#align(right)[*Grand Total: #{}*]\n",
            lit(&format!("{total:.2}"))
        ));
        Ok(src)
    }
}

#[derive(Debug, Clone)]
pub struct PurchaseInvoice {
    pub number: String,
    pub date: String,
    pub product: String,
    pub supplier: String,
    pub quantity: i64,
}

impl PurchaseInvoice {
    pub fn to_typst(&self) -> String {
        let mut src = String::from(PREAMBLE);
        src.push_str("#text(size: 18pt, weight: \"bold\")[Purchase Invoice]\n\n");
        for (label, value) in [
            ("Invoice ID", self.number.clone()),
            ("Date", self.date.clone()),
            ("Product", self.product.clone()),
            ("Supplier", self.supplier.clone()),
            ("Quantity", self.quantity.to_string()),
        ] {
            src.push_str(&format!("{label}: #{}\\\n", lit(&value)));
        }
        src
    }
}

/// Runs `typst compile` in a scratch directory and returns the PDF bytes.
pub async fn compile_typst(typst_bin: &str, source: &str) -> Result<Vec<u8>> {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    let tmp_dir = std::env::temp_dir().join(format!("typst-{suffix}"));
    fs::create_dir(&tmp_dir)
        .await
        .context("create typst scratch directory")?;

    let result = run_typst(typst_bin, &tmp_dir, source).await;
    let _ = fs::remove_dir_all(&tmp_dir).await;
    result
}

async fn run_typst(typst_bin: &str, dir: &std::path::Path, source: &str) -> Result<Vec<u8>> {
    let input_path = dir.join("input.typ");
    let output_path = dir.join("output.pdf");
    fs::write(&input_path, source)
        .await
        .context("write typst source")?;

    let output = Command::new(typst_bin)
        .arg("compile")
        .arg(&input_path)
        .arg(&output_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                anyhow::anyhow!("`{typst_bin}` not found, install typst or set TYPST_BIN")
            } else {
                anyhow::Error::new(err).context("run typst")
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.trim().is_empty() {
            bail!("typst exited with {}", output.status);
        }
        bail!("typst failed: {}", stderr.trim());
    }

    fs::read(&output_path).await.context("read generated pdf")
}
