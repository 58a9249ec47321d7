//! Per-document summary extraction: parties, payments and totals.

use tracing::warn;

use super::{DocumentExtractor, Source};
use crate::error::ExtractionError;
use crate::models::record::{FactRecord, RawFields};
use crate::values::number_list::SEPARATOR;
use crate::xml::Element;

/// Payment breakdown as raw ';'-joined strings.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Payment {
    methods: String,
    amounts: String,
}

/// Raw totals from the `ICMSTot` group.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Totals {
    products: String,
    discount: String,
    taxes: String,
}

/// Fact row extractor.
#[derive(Debug, Clone)]
pub struct FactExtractor {
    warn_on_defaulted_totals: bool,
}

impl FactExtractor {
    pub fn new() -> Self {
        Self {
            warn_on_defaulted_totals: true,
        }
    }

    /// Set whether a missing total recorded as zero is logged.
    pub fn with_total_warnings(mut self, warn: bool) -> Self {
        self.warn_on_defaulted_totals = warn;
        self
    }

    fn payment(&self, root: &Element, errors: &mut Vec<ExtractionError>) -> Option<Payment> {
        // 4.00 layouts nest entries in <detPag>; older ones repeat <pag> itself
        let mut entries = root.find_all("detPag");
        if entries.is_empty() {
            entries = root
                .find_all("pag")
                .into_iter()
                .filter(|p| p.child("tPag").is_some())
                .collect();
        }

        if entries.is_empty() {
            errors.push(ExtractionError::parse("pag/detPag", "no payment entries"));
            return None;
        }

        let mut methods = Vec::with_capacity(entries.len());
        let mut amounts = Vec::with_capacity(entries.len());
        let mut complete = true;

        for (i, entry) in entries.iter().enumerate() {
            for (tag, out) in [("tPag", &mut methods), ("vPag", &mut amounts)] {
                match entry.find_text(tag) {
                    Some(v) => out.push(v),
                    None => {
                        errors.push(ExtractionError::parse(
                            format!("detPag[{i}]/{tag}"),
                            "payment entry incomplete",
                        ));
                        complete = false;
                    }
                }
            }
        }

        let sep = SEPARATOR.to_string();
        complete.then(|| Payment {
            methods: methods.join(&sep),
            amounts: amounts.join(&sep),
        })
    }

    fn totals(&self, root: &Element, errors: &mut Vec<ExtractionError>) -> Option<Totals> {
        let Some(total) = root.find_first("ICMSTot") else {
            errors.push(ExtractionError::parse("ICMSTot", "totals group not found"));
            return None;
        };

        let required = |tag: &str| match total.find_text(tag) {
            Some(v) => v.to_string(),
            None => {
                if self.warn_on_defaulted_totals {
                    warn!("ICMSTot/{tag} missing, recording 0");
                }
                "0".to_string()
            }
        };

        Some(Totals {
            products: required("vNF"),
            taxes: required("vTotTrib"),
            discount: total.find_text("vDesc").unwrap_or("0").to_string(),
        })
    }
}

impl Default for FactExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentExtractor for FactExtractor {
    type Output = FactRecord;

    fn extract(&self, source: &Source<'_>, errors: &mut Vec<ExtractionError>) -> Option<FactRecord> {
        let root = source.root;

        let payment = self.payment(root, errors);

        // date-only dEmi of older layouts carries no offset and is not accepted
        let issued_at = root.find_text("dhEmi");
        if issued_at.is_none() {
            errors.push(ExtractionError::parse("dhEmi", "issue timestamp not found"));
        }

        let totals = self.totals(root, errors);

        let (Some(payment), Some(issued_at), Some(totals)) = (payment, issued_at, totals) else {
            return None;
        };

        let raw = RawFields::from([
            ("FiscalKey", source.fiscal_key.to_string()),
            ("IssuedAt", issued_at.to_string()),
            ("PaymentMethods", payment.methods),
            ("PaymentAmounts", payment.amounts),
            ("TotalProducts", totals.products),
            ("TotalDiscount", totals.discount),
            ("TotalTaxes", totals.taxes),
        ]);

        match FactRecord::new(&raw) {
            Ok(fact) => Some(fact),
            Err(row_errors) => {
                errors.extend(row_errors.into_iter().map(ExtractionError::from));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::xml;
    use chrono::{FixedOffset, TimeZone};
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const NFE_V4: &str = include_str!("../../tests/fixtures/nfe_v4.xml");
    const KEY: &str = "26240811122233344455550010045645641789789784";

    fn extract(doc: &str) -> (Option<FactRecord>, Vec<ExtractionError>) {
        let root = xml::parse(doc).unwrap();
        let mut errors = Vec::new();
        let fact = FactExtractor::default().extract(&Source::new(&root, KEY), &mut errors);
        (fact, errors)
    }

    fn minimal(pag: &str, total: &str) -> String {
        format!(
            "<NFe><infNFe><ide><dhEmi>2024-08-31T16:17:16-03:00</dhEmi></ide>\
             <total>{total}</total>{pag}</infNFe></NFe>"
        )
    }

    #[test]
    fn test_extract_fixture() {
        let (fact, errors) = extract(NFE_V4);
        assert!(errors.is_empty(), "{errors:?}");
        let fact = fact.unwrap();

        assert_eq!(fact.fiscal_key().as_str(), KEY);
        assert_eq!(fact.payment_methods().unwrap().as_str(), "14");
        assert_eq!(fact.payment_amounts().unwrap().as_str(), "996.85");
        assert_eq!(
            fact.issued_at(),
            Some(
                FixedOffset::west_opt(3 * 3600)
                    .unwrap()
                    .with_ymd_and_hms(2024, 8, 31, 16, 17, 16)
                    .unwrap()
            )
        );
        let row = fact.row();
        assert_eq!(row.decimal("TotalProducts"), Some(Decimal::from_str("996.85").unwrap()));
        assert_eq!(row.decimal("TotalTaxes"), Some(Decimal::from_str("348.77").unwrap()));
        assert_eq!(row.get("TotalDiscount").unwrap().to_string(), "0.00");
    }

    #[test]
    fn test_multiple_payment_entries() {
        let doc = minimal(
            "<pag><detPag><tPag>01</tPag><vPag>10.00</vPag></detPag>\
             <detPag><tPag>03</tPag><vPag>90.50</vPag></detPag></pag>",
            "<ICMSTot><vNF>100.50</vNF><vTotTrib>5.00</vTotTrib></ICMSTot>",
        );
        let (fact, errors) = extract(&doc);
        assert!(errors.is_empty(), "{errors:?}");
        let fact = fact.unwrap();
        assert_eq!(fact.payment_methods().unwrap().as_str(), "01;03");
        assert_eq!(fact.payment_amounts().unwrap().as_str(), "10.00;90.50");
    }

    #[test]
    fn test_legacy_payment_layout() {
        let doc = minimal(
            "<pag><tPag>01</tPag><vPag>10.00</vPag></pag>",
            "<ICMSTot><vNF>10.00</vNF><vTotTrib>1.00</vTotTrib></ICMSTot>",
        );
        let (fact, _) = extract(&doc);
        assert_eq!(fact.unwrap().payment_methods().unwrap().as_str(), "01");
    }

    #[test]
    fn test_missing_totals_default_to_zero() {
        let doc = minimal(
            "<pag><detPag><tPag>01</tPag><vPag>10.00</vPag></detPag></pag>",
            "<ICMSTot></ICMSTot>",
        );
        let (fact, errors) = extract(&doc);
        assert!(errors.is_empty());
        let fact = fact.unwrap();
        assert_eq!(fact.row().decimal("TotalProducts"), Some(Decimal::ZERO));
        assert_eq!(fact.row().decimal("TotalTaxes"), Some(Decimal::ZERO));
        assert_eq!(fact.row().decimal("TotalDiscount"), Some(Decimal::ZERO));
    }

    #[test]
    fn test_malformed_amount_is_validation_error() {
        let doc = minimal(
            "<pag><detPag><tPag>01</tPag><vPag>dez reais</vPag></detPag></pag>",
            "<ICMSTot><vNF>10.00</vNF><vTotTrib>1.00</vTotTrib></ICMSTot>",
        );
        let (fact, errors) = extract(&doc);
        assert!(fact.is_none());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_missing_precursors_collected() {
        let (fact, errors) = extract("<NFe><infNFe/></NFe>");
        assert!(fact.is_none());
        let fields: Vec<_> = errors
            .iter()
            .map(|e| match e {
                ExtractionError::Parse { field, .. } => field.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(fields, vec!["pag/detPag", "dhEmi", "ICMSTot"]);
    }

    #[test]
    fn test_date_only_issue_is_parse_error() {
        let doc = NFE_V4.replace(
            "<dhEmi>2024-08-31T16:17:16-03:00</dhEmi>",
            "<dEmi>2024-08-31</dEmi>",
        );
        assert_ne!(doc, NFE_V4);

        let (fact, errors) = extract(&doc);
        assert!(fact.is_none());
        assert_eq!(
            errors,
            vec![ExtractionError::parse("dhEmi", "issue timestamp not found")]
        );
    }

    #[test]
    fn test_incomplete_payment_entry() {
        let doc = minimal(
            "<pag><detPag><tPag>01</tPag></detPag></pag>",
            "<ICMSTot><vNF>10.00</vNF><vTotTrib>1.00</vTotTrib></ICMSTot>",
        );
        let (fact, errors) = extract(&doc);
        assert!(fact.is_none());
        assert_eq!(errors[0].kind(), ErrorKind::Parse);
    }
}
