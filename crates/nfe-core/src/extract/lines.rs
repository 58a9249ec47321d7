//! Product line extraction from `det` entries.
//!
//! Each `det` is read in four passes (codes, quantities, description and
//! tax figures). The passes must agree on the number of products, otherwise
//! the document is rejected rather than risk misaligned columns.

use super::{DocumentExtractor, Source};
use crate::error::ExtractionError;
use crate::models::record::{LineRecord, RawFields};
use crate::xml::Element;

/// Tax columns as (column, group tag, value tag). Absent groups read as 0.
const TAX_FIELDS: [(&str, &str, &str); 9] = [
    ("PisBase", "PIS", "vBC"),
    ("PisValue", "PIS", "vPIS"),
    ("CofinsBase", "COFINS", "vBC"),
    ("CofinsValue", "COFINS", "vCOFINS"),
    ("IcmsRetainedBase", "ICMS", "vBCSTRet"),
    ("IcmsRetainedValue", "ICMS", "vICMSSTRet"),
    ("IcmsSubstituteValue", "ICMS", "vICMSSubstituto"),
    ("IcmsEffectiveBase", "ICMS", "vBCEfet"),
    ("IcmsEffectiveValue", "ICMS", "vICMSEfet"),
];

const CODE_FIELDS: [(&str, &str); 5] = [
    ("ProductCode", "cProd"),
    ("Barcode", "cEAN"),
    ("NcmCode", "NCM"),
    ("CestCode", "CEST"),
    ("CfopCode", "CFOP"),
];

type Columns = Vec<(&'static str, String)>;

/// Line row extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineExtractor;

impl LineExtractor {
    fn codes(items: &[&Element]) -> Vec<Columns> {
        items
            .iter()
            .filter_map(|det| det.child("prod"))
            .map(|prod| {
                CODE_FIELDS
                    .iter()
                    .map(|&(column, tag)| (column, text_or(prod, tag, "")))
                    .collect()
            })
            .collect()
    }

    fn quantities(items: &[&Element], errors: &mut Vec<ExtractionError>) -> Vec<Columns> {
        let mut out = Vec::with_capacity(items.len());

        for (i, prod) in items.iter().filter_map(|det| det.child("prod")).enumerate() {
            let mut columns = Columns::new();
            for (column, tag) in [("QtyCommercial", "qCom"), ("QtyTaxable", "qTrib")] {
                match prod.find_text(tag) {
                    Some(v) => columns.push((column, v.to_string())),
                    None => errors.push(ExtractionError::parse(
                        format!("det[{}]/{tag}", i + 1),
                        "quantity not found",
                    )),
                }
            }
            columns.push(("UnitCommercial", text_or(prod, "uCom", "")));
            columns.push(("UnitTaxable", text_or(prod, "uTrib", "")));
            out.push(columns);
        }

        out
    }

    fn descriptions(items: &[&Element]) -> Vec<Columns> {
        items
            .iter()
            .filter_map(|det| det.child("prod"))
            .map(|prod| vec![("Description", text_or(prod, "xProd", ""))])
            .collect()
    }

    fn taxes(items: &[&Element]) -> Vec<Columns> {
        items
            .iter()
            .filter(|det| det.child("prod").is_some())
            .map(|det| {
                let mut columns = vec![("UnitPrice", text_or(det, "vUnCom", "0"))];
                let imposto = det.child("imposto");
                for (column, group, tag) in TAX_FIELDS {
                    let value = imposto
                        .and_then(|i| i.find_first(group))
                        .and_then(|g| g.find_text(tag))
                        .unwrap_or("0");
                    columns.push((column, value.to_string()));
                }
                columns
            })
            .collect()
    }
}

impl DocumentExtractor for LineExtractor {
    type Output = Vec<LineRecord>;

    fn extract(
        &self,
        source: &Source<'_>,
        errors: &mut Vec<ExtractionError>,
    ) -> Option<Vec<LineRecord>> {
        let items = source.root.find_all("det");
        if items.is_empty() {
            errors.push(ExtractionError::parse("det", "no product lines"));
            return None;
        }

        let before = errors.len();
        let codes = Self::codes(&items);
        let quantities = Self::quantities(&items, errors);
        let descriptions = Self::descriptions(&items);
        let taxes = Self::taxes(&items);

        if codes.len() != items.len()
            || quantities.len() != codes.len()
            || descriptions.len() != codes.len()
            || taxes.len() != codes.len()
        {
            errors.push(ExtractionError::Validation {
                field: "det".to_string(),
                value: format!(
                    "{} entries, {} codes, {} quantities, {} descriptions, {} tax groups",
                    items.len(),
                    codes.len(),
                    quantities.len(),
                    descriptions.len(),
                    taxes.len()
                ),
                reason: "product line passes disagree on count".to_string(),
            });
            return None;
        }

        if errors.len() > before {
            return None;
        }

        let mut lines = Vec::with_capacity(codes.len());
        let passes = codes.into_iter().zip(quantities).zip(descriptions).zip(taxes);

        for (n, (((codes, quantities), description), taxes)) in passes.enumerate() {
            let mut raw = RawFields::from([("FiscalKey", source.fiscal_key.to_string())]);
            raw.extend(codes);
            raw.extend(quantities);
            raw.extend(description);
            raw.extend(taxes);

            match LineRecord::new(&raw) {
                Ok(line) => lines.push(line),
                Err(row_errors) => errors.extend(
                    row_errors
                        .into_iter()
                        .map(|e| at_line(ExtractionError::from(e), n + 1)),
                ),
            }
        }

        (errors.len() == before).then_some(lines)
    }
}

fn text_or(element: &Element, tag: &str, default: &str) -> String {
    element.find_text(tag).unwrap_or(default).to_string()
}

/// Qualify a field name with its 1-based product line number.
fn at_line(err: ExtractionError, n: usize) -> ExtractionError {
    match err {
        ExtractionError::Parse { field, reason } => ExtractionError::Parse {
            field: format!("det[{n}]/{field}"),
            reason,
        },
        ExtractionError::Validation {
            field,
            value,
            reason,
        } => ExtractionError::Validation {
            field: format!("det[{n}]/{field}"),
            value,
            reason,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::xml;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const NFE_V4: &str = include_str!("../../tests/fixtures/nfe_v4.xml");
    const KEY: &str = "26240811122233344455550010045645641789789784";

    fn extract(doc: &str) -> (Option<Vec<LineRecord>>, Vec<ExtractionError>) {
        let root = xml::parse(doc).unwrap();
        let mut errors = Vec::new();
        let lines = LineExtractor.extract(&Source::new(&root, KEY), &mut errors);
        (lines, errors)
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_extract_fixture_lines() {
        let (lines, errors) = extract(NFE_V4);
        assert!(errors.is_empty(), "{errors:?}");
        let lines = lines.unwrap();
        assert_eq!(lines.len(), 2);

        let first = lines[0].row();
        assert_eq!(lines[0].product_code(), "7891000100103");
        assert_eq!(first.text("Description"), Some("LEITE CONDENSADO MOCA 395G"));
        assert_eq!(first.text("NcmCode"), Some("04029900"));
        assert_eq!(first.text("CfopCode"), Some("5405"));
        assert_eq!(first.decimal("QtyCommercial"), Some(dec("48.0000")));
        assert_eq!(first.text("UnitCommercial"), Some("UN"));
        assert_eq!(first.decimal("UnitPrice"), Some(dec("6.2900000000")));
        assert_eq!(first.decimal("PisValue"), Some(dec("0.00")));
        assert_eq!(first.decimal("IcmsRetainedValue"), Some(dec("41.18")));

        let second = lines[1].row();
        assert_eq!(second.decimal("PisBase"), Some(dec("694.93")));
        assert_eq!(second.decimal("CofinsValue"), Some(dec("52.81")));
        assert_eq!(second.decimal("IcmsEffectiveBase"), Some(Decimal::ZERO));
    }

    #[test]
    fn test_missing_tax_groups_default_to_zero() {
        let doc = "<NFe><det><prod><cProd>1</cProd><qCom>1</qCom><qTrib>1</qTrib>\
                   <vUnCom>2.50</vUnCom></prod></det></NFe>";
        let (lines, errors) = extract(doc);
        assert!(errors.is_empty(), "{errors:?}");
        let line = &lines.unwrap()[0];
        for (column, _, _) in TAX_FIELDS {
            assert_eq!(line.row().decimal(column), Some(Decimal::ZERO), "{column}");
        }
        assert_eq!(line.row().text("Barcode"), Some(""));
    }

    #[test]
    fn test_missing_quantity_is_parse_error() {
        let doc = "<NFe><det><prod><cProd>1</cProd><qTrib>1</qTrib></prod></det></NFe>";
        let (lines, errors) = extract(doc);
        assert!(lines.is_none());
        assert_eq!(
            errors,
            vec![ExtractionError::parse("det[1]/qCom", "quantity not found")]
        );
    }

    #[test]
    fn test_pass_count_mismatch() {
        let doc = "<NFe><det><prod><cProd>1</cProd><qCom>1</qCom><qTrib>1</qTrib></prod></det>\
                   <det><imposto/></det></NFe>";
        let (lines, errors) = extract(doc);
        assert!(lines.is_none());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_invalid_value_names_line() {
        let doc = "<NFe><det><prod><cProd>1</cProd><qCom>um</qCom><qTrib>1</qTrib></prod></det></NFe>";
        let (_, errors) = extract(doc);
        match &errors[0] {
            ExtractionError::Validation { field, .. } => assert_eq!(field, "det[1]/QtyCommercial"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_no_products() {
        let (lines, errors) = extract("<NFe><infNFe/></NFe>");
        assert!(lines.is_none());
        assert_eq!(errors[0].kind(), ErrorKind::Parse);
    }
}
