//! Column naming and reference layout configuration.
//!
//! Every key is optional in the YAML document; absent keys fall back to the
//! headers used by the Japanese back-office export this tool was built for.
//!
//! ```yaml
//! reference_path: masters/media-codes.xlsx
//! approved_status: approved
//! columns:
//!   income: annual_income
//!   media_code: media
//! reference:
//!   identity: company
//! ```

use std::{fs::File, io::BufReader, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::schema::Field;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub reference_path: PathBuf,
    pub approved_status: String,
    pub columns: ColumnNames,
    pub reference: ReferenceLayout,
    pub gender: GenderTokens,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reference_path: PathBuf::from("媒体コードマスタ.xlsx"),
            approved_status: "承認".to_string(),
            columns: ColumnNames::default(),
            reference: ReferenceLayout::default(),
            gender: GenderTokens::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let config = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config YAML {path:?}"))?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Source header for each known field of the applicant sheet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ColumnNames {
    pub age: String,
    pub income: String,
    pub desired_loan: String,
    pub mortgage_payment: String,
    pub years_employed: String,
    pub other_loans: String,
    pub gender: String,
    pub application_date: String,
    pub approval_status: String,
    pub media_code: String,
    pub disbursement_current: String,
    pub disbursement_next: String,
    pub disbursement_following: String,
    pub prefecture: String,
    pub purpose: String,
    pub family_structure: String,
    pub children: String,
    pub employment_status: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            age: "年齢".into(),
            income: "年収".into(),
            desired_loan: "同借希望額".into(),
            mortgage_payment: "住宅ローン返済月額".into(),
            years_employed: "勤続年数".into(),
            other_loans: "他社借入件数".into(),
            gender: "性別".into(),
            application_date: "申込日".into(),
            approval_status: "承認区分".into(),
            media_code: "媒体コード".into(),
            disbursement_current: "取扱金額_申込当月".into(),
            disbursement_next: "取扱金額_申込翌月末".into(),
            disbursement_following: "取扱金額_申込翌々月末".into(),
            prefecture: "都道府県".into(),
            purpose: "利用目的".into(),
            family_structure: "家族構成".into(),
            children: "子供数".into(),
            employment_status: "勤務状況".into(),
        }
    }
}

impl ColumnNames {
    pub fn header(&self, field: Field) -> &str {
        match field {
            Field::Age => &self.age,
            Field::Income => &self.income,
            Field::DesiredLoan => &self.desired_loan,
            Field::MortgagePayment => &self.mortgage_payment,
            Field::YearsEmployed => &self.years_employed,
            Field::OtherLoans => &self.other_loans,
            Field::Gender => &self.gender,
            Field::ApplicationDate => &self.application_date,
            Field::ApprovalStatus => &self.approval_status,
            Field::MediaCode => &self.media_code,
            Field::DisbursementCurrent => &self.disbursement_current,
            Field::DisbursementNext => &self.disbursement_next,
            Field::DisbursementFollowing => &self.disbursement_following,
            Field::Prefecture => &self.prefecture,
            Field::Purpose => &self.purpose,
            Field::FamilyStructure => &self.family_structure,
            Field::Children => &self.children,
            Field::EmploymentStatus => &self.employment_status,
        }
    }
}

/// Layout of the wide media-code master: one identity column, one category
/// column, and every remaining column holds codes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReferenceLayout {
    pub identity: String,
    pub identity_aliases: Vec<String>,
    pub category: String,
}

impl Default for ReferenceLayout {
    fn default() -> Self {
        Self {
            identity: "媒体名".into(),
            identity_aliases: vec!["会社名".into()],
            category: "カテゴリ".into(),
        }
    }
}

impl ReferenceLayout {
    pub fn is_identity(&self, header: &str) -> bool {
        header == self.identity || self.identity_aliases.iter().any(|alias| alias == header)
    }
}

/// Tokens recognised in gender cells, e.g. `0001_男性` or `女性`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenderTokens {
    pub male: String,
    pub female: String,
}

impl Default for GenderTokens {
    fn default() -> Self {
        Self {
            male: "男性".into(),
            female: "女性".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults_for_missing_keys() {
        let yaml = "approved_status: approved\ncolumns:\n  income: annual_income\n";
        let config: Config = serde_yaml::from_str(yaml).expect("parse config");
        assert_eq!(config.approved_status, "approved");
        assert_eq!(config.columns.income, "annual_income");
        assert_eq!(config.columns.age, "年齢");
        assert_eq!(config.reference, ReferenceLayout::default());
    }

    #[test]
    fn identity_alias_is_recognised() {
        let layout = ReferenceLayout::default();
        assert!(layout.is_identity("媒体名"));
        assert!(layout.is_identity("会社名"));
        assert!(!layout.is_identity("カテゴリ"));
    }
}
