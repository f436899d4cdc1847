//! Assessor tax roll data and historical sale records.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaxInfo {
    pub apn: Option<String>,
    pub assessed_value: Option<f64>,
    pub annual_tax: Option<f64>,
    pub tax_year: Option<i32>,
    pub homestead: Option<bool>,
}

impl TaxInfo {
    pub fn tax_year_in_range(&self, current_year: i32) -> bool {
        match self.tax_year {
            Some(year) => (1900..=current_year + 1).contains(&year),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleRecord {
    pub sale_date: NaiveDate,
    pub sale_price: f64,
    pub buyer: Option<String>,
    pub seller: Option<String>,
    pub financing_type: Option<String>,
    pub deed_type: Option<String>,
    pub document_number: Option<String>,
}
