use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of expense categories a receipt can be filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExpenseCode {
    Central,
    Discretionary,
    Approved,
    Other,
}

impl ExpenseCode {
    pub const ALL: [ExpenseCode; 4] = [
        ExpenseCode::Central,
        ExpenseCode::Discretionary,
        ExpenseCode::Approved,
        ExpenseCode::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExpenseCode::Central => "CENTRAL",
            ExpenseCode::Discretionary => "DISCRETIONARY",
            ExpenseCode::Approved => "APPROVED",
            ExpenseCode::Other => "OTHER",
        }
    }
}

impl fmt::Display for ExpenseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownExpenseCode(pub String);

impl FromStr for ExpenseCode {
    type Err = UnknownExpenseCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|code| code.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownExpenseCode(s.to_string()))
    }
}

/// The six fields structured extraction tries to fill. Any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiptFields {
    pub total: Option<f64>,
    pub tax: Option<f64>,
    pub currency: Option<String>,
    pub vendor: Option<String>,
    pub date: Option<String>,
    pub expense_code: Option<ExpenseCode>,
}

impl ReceiptFields {
    /// How many fields were filled, out of how many.
    pub fn coverage(&self) -> (usize, usize) {
        let filled = [
            self.total.is_some(),
            self.tax.is_some(),
            self.currency.is_some(),
            self.vendor.is_some(),
            self.date.is_some(),
            self.expense_code.is_some(),
        ]
        .iter()
        .filter(|&&v| v)
        .count();
        (filled, 6)
    }

    pub fn is_empty(&self) -> bool {
        self.coverage().0 == 0
    }
}
