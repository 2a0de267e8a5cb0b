//! Header dictionary and row-to-product mapping.

use std::str::FromStr;

use bigdecimal::BigDecimal;

use super::reader::RawRow;
use crate::models::Product;

const TITLE: &[&str] = &["product_title"];
const DESCRIPTION: &[&str] = &["product_description"];
const STYLE: &[&str] = &["style#", "style_#", "style"];
const COLOR_CODE: &[&str] = &["sanmar_mainframe_color"];
const SIZE: &[&str] = &["size"];
const COLOR_NAME: &[&str] = &["color_name"];
const PRICE: &[&str] = &["piece_price"];

/// Column order assumed when a file carries no heading row.
pub(crate) const POSITIONAL_HEADINGS: &[&str] = &[
    "unique_key",
    "product_title",
    "product_description",
    "style#",
    "sanmar_mainframe_color",
    "size",
    "color_name",
    "piece_price",
];

/// `" Product Title "` -> `"product_title"`. Also drops a UTF-8 BOM.
pub fn normalize_heading(raw: &str) -> String {
    let cleaned = raw.trim_start_matches('\u{feff}').trim().to_lowercase();
    let mut out = String::with_capacity(cleaned.len());
    let mut pending_sep = false;
    for ch in cleaned.chars() {
        if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('_');
        }
        pending_sep = false;
        out.push(ch);
    }
    out
}

/// Strips currency symbols and thousands separators; anything else that
/// does not parse is treated as an absent price.
pub fn parse_price(raw: &str) -> Option<BigDecimal> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    BigDecimal::from_str(&cleaned).ok()
}

pub(crate) enum RowOutcome {
    Product(Product),
    /// Every cell empty; skipped without counting.
    Blank,
    /// Row has data but no upsert key.
    MissingKey,
}

/// Resolved positions of the known columns within one file's header.
#[derive(Debug, Clone)]
pub(crate) struct ColumnMap {
    unique_key: usize,
    title: usize,
    description: Option<usize>,
    style: Option<usize>,
    color_code: Option<usize>,
    size: Option<usize>,
    color_name: Option<usize>,
    price: Option<usize>,
}

fn find(headers: &[String], aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| headers.iter().position(|h| h == alias))
}

impl ColumnMap {
    /// `headers` must already be normalised. On failure returns the names of
    /// the required columns that are absent.
    pub(crate) fn from_headers(headers: &[String], upsert_key: &str) -> Result<Self, Vec<String>> {
        let key_heading = normalize_heading(upsert_key);
        let unique_key = headers.iter().position(|h| *h == key_heading);
        let title = find(headers, TITLE);

        let mut missing = Vec::new();
        if unique_key.is_none() {
            missing.push(key_heading);
        }
        if title.is_none() {
            missing.push(TITLE[0].to_string());
        }
        match (unique_key, title) {
            (Some(unique_key), Some(title)) => Ok(Self {
                unique_key,
                title,
                description: find(headers, DESCRIPTION),
                style: find(headers, STYLE),
                color_code: find(headers, COLOR_CODE),
                size: find(headers, SIZE),
                color_name: find(headers, COLOR_NAME),
                price: find(headers, PRICE),
            }),
            _ => Err(missing),
        }
    }

    pub(crate) fn to_product(&self, row: &RawRow) -> RowOutcome {
        if row.iter().all(Option::is_none) {
            return RowOutcome::Blank;
        }
        let cell = |idx: Option<usize>| idx.and_then(|i| row.get(i).cloned().flatten());
        let Some(unique_key) = cell(Some(self.unique_key)) else {
            return RowOutcome::MissingKey;
        };
        RowOutcome::Product(Product {
            unique_key,
            title: cell(Some(self.title)),
            description: cell(self.description),
            style: cell(self.style),
            color_code: cell(self.color_code),
            size: cell(self.size),
            color_name: cell(self.color_name),
            price: cell(self.price).as_deref().and_then(parse_price),
        })
    }
}
