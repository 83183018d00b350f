//! Banding rules for the continuous applicant attributes.
//!
//! Each rule is a declared table rather than a shared formula: the loan rule
//! keeps `100-199`/`200-299`/`300+` tiers, the mortgage rule stops at `100+`,
//! income has only three bands and years employed uses inclusive upper edges.
//! Every rule is total; null, NaN and (for age) infinite inputs map to
//! [`UNKNOWN`].

use serde::Serialize;

use crate::schema::{Field, Record};

pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BandRule {
    Age,
    Income,
    LoanAmount,
    MortgagePayment,
    YearsEmployed,
}

#[derive(Debug, Clone, Copy)]
enum Edge {
    Below(f64),
    AtMost(f64),
}

impl Edge {
    fn admits(self, value: f64) -> bool {
        match self {
            Edge::Below(limit) => value < limit,
            Edge::AtMost(limit) => value <= limit,
        }
    }
}

struct BandTable {
    truncate: bool,
    zero: Option<&'static str>,
    steps: &'static [(Edge, &'static str)],
    top: &'static str,
}

const AGE: BandTable = BandTable {
    truncate: true,
    zero: None,
    steps: &[
        (Edge::Below(10.0), "0-9"),
        (Edge::Below(20.0), "10-19"),
        (Edge::Below(30.0), "20-29"),
        (Edge::Below(40.0), "30-39"),
        (Edge::Below(50.0), "40-49"),
        (Edge::Below(60.0), "50-59"),
        (Edge::Below(70.0), "60-69"),
        (Edge::Below(80.0), "70-79"),
        (Edge::Below(90.0), "80-89"),
    ],
    top: "90+",
};

const INCOME: BandTable = BandTable {
    truncate: false,
    zero: None,
    steps: &[(Edge::Below(500.0), "0-499"), (Edge::Below(1000.0), "500-999")],
    top: "1000+",
};

const LOAN_AMOUNT: BandTable = BandTable {
    truncate: false,
    zero: Some("0"),
    steps: &[
        (Edge::Below(10.0), "1-9"),
        (Edge::Below(20.0), "10-19"),
        (Edge::Below(30.0), "20-29"),
        (Edge::Below(40.0), "30-39"),
        (Edge::Below(50.0), "40-49"),
        (Edge::Below(60.0), "50-59"),
        (Edge::Below(70.0), "60-69"),
        (Edge::Below(80.0), "70-79"),
        (Edge::Below(90.0), "80-89"),
        (Edge::Below(100.0), "90-99"),
        (Edge::Below(200.0), "100-199"),
        (Edge::Below(300.0), "200-299"),
    ],
    top: "300+",
};

const MORTGAGE_PAYMENT: BandTable = BandTable {
    truncate: false,
    zero: Some("0"),
    steps: &[
        (Edge::Below(10.0), "1-9"),
        (Edge::Below(20.0), "10-19"),
        (Edge::Below(30.0), "20-29"),
        (Edge::Below(40.0), "30-39"),
        (Edge::Below(50.0), "40-49"),
        (Edge::Below(60.0), "50-59"),
        (Edge::Below(70.0), "60-69"),
        (Edge::Below(80.0), "70-79"),
        (Edge::Below(90.0), "80-89"),
        (Edge::Below(100.0), "90-99"),
    ],
    top: "100+",
};

const YEARS_EMPLOYED: BandTable = BandTable {
    truncate: false,
    zero: Some("0"),
    steps: &[
        (Edge::AtMost(3.0), "1-3"),
        (Edge::AtMost(9.0), "4-9"),
        (Edge::AtMost(20.0), "10-20"),
    ],
    top: "21+",
};

impl BandRule {
    pub const ALL: [BandRule; 5] = [
        BandRule::Age,
        BandRule::Income,
        BandRule::LoanAmount,
        BandRule::MortgagePayment,
        BandRule::YearsEmployed,
    ];

    fn table(self) -> &'static BandTable {
        match self {
            BandRule::Age => &AGE,
            BandRule::Income => &INCOME,
            BandRule::LoanAmount => &LOAN_AMOUNT,
            BandRule::MortgagePayment => &MORTGAGE_PAYMENT,
            BandRule::YearsEmployed => &YEARS_EMPLOYED,
        }
    }

    /// The numeric field this rule buckets.
    pub fn source(self) -> Field {
        match self {
            BandRule::Age => Field::Age,
            BandRule::Income => Field::Income,
            BandRule::LoanAmount => Field::DesiredLoan,
            BandRule::MortgagePayment => Field::MortgagePayment,
            BandRule::YearsEmployed => Field::YearsEmployed,
        }
    }

    pub fn band(self, value: Option<f64>) -> &'static str {
        let table = self.table();
        let Some(mut x) = value.filter(|v| !v.is_nan()) else {
            return UNKNOWN;
        };
        if table.truncate {
            if !x.is_finite() {
                return UNKNOWN;
            }
            x = x.trunc();
        }
        if let Some(zero) = table.zero
            && x == 0.0
        {
            return zero;
        }
        table
            .steps
            .iter()
            .find(|(edge, _)| edge.admits(x))
            .map_or(table.top, |(_, label)| label)
    }

    /// Band labels in display order, followed by [`UNKNOWN`].
    pub fn labels(self) -> Vec<&'static str> {
        let table = self.table();
        table
            .zero
            .into_iter()
            .chain(table.steps.iter().map(|(_, label)| *label))
            .chain([table.top, UNKNOWN])
            .collect()
    }
}

/// The five bands of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bands {
    pub age: &'static str,
    pub income: &'static str,
    pub loan_amount: &'static str,
    pub mortgage_payment: &'static str,
    pub years_employed: &'static str,
}

impl Bands {
    pub fn of(record: &Record) -> Self {
        Self {
            age: BandRule::Age.band(record.age),
            income: BandRule::Income.band(record.income),
            loan_amount: BandRule::LoanAmount.band(record.desired_loan),
            mortgage_payment: BandRule::MortgagePayment.band(record.mortgage_payment),
            years_employed: BandRule::YearsEmployed.band(record.years_employed),
        }
    }

    pub fn get(&self, rule: BandRule) -> &'static str {
        match rule {
            BandRule::Age => self.age,
            BandRule::Income => self.income,
            BandRule::LoanAmount => self.loan_amount,
            BandRule::MortgagePayment => self.mortgage_payment,
            BandRule::YearsEmployed => self.years_employed,
        }
    }
}
