//! Annual report details carried in a record's `data` column as
//! `"<year> --- <name>[ --- <state>]"`.

use std::fmt;

use hyke_core::error::{HykeError, Result};

const SEPARATOR: &str = "---";

/// Parsed annual report reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnualReport {
    pub year: String,
    pub name: String,
    pub state: Option<String>,
}

impl AnnualReport {
    pub fn new(year: impl Into<String>, name: impl Into<String>, state: Option<String>) -> Self {
        Self {
            year: year.into(),
            name: name.into(),
            state,
        }
    }

    /// Parse the `---`-delimited form. Segments are trimmed; an empty state counts as none.
    pub fn parse(data: &str) -> Result<Self> {
        let parts: Vec<&str> = data.split(SEPARATOR).map(str::trim).collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(HykeError::MalformedData(format!(
                "annual report data {data:?} must look like \"<year> --- <name>[ --- <state>]\""
            )));
        }

        let year = parts[0];
        let name = parts[1];
        if year.is_empty() || name.is_empty() {
            return Err(HykeError::MalformedData(format!(
                "annual report data {data:?} is missing the year or the name"
            )));
        }
        let state = parts
            .get(2)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        Ok(Self::new(year, name, state))
    }

    /// `"<year> --- <name>"`, the form every reminder starts with.
    pub fn base_key(&self) -> String {
        format!("{} {SEPARATOR} {}", self.year, self.name)
    }

    /// Whether a pending reminder's data refers to this report.
    ///
    /// Without a state any state suffix matches; with a state only the bare
    /// key or the key with the same state matches.
    pub fn matches_reminder(&self, data: &str) -> bool {
        let base = self.base_key();
        if data == base {
            return true;
        }
        match &self.state {
            Some(state) => data == format!("{base} {SEPARATOR} {state}"),
            None => data
                .strip_prefix(&base)
                .and_then(|rest| rest.strip_prefix(&format!(" {SEPARATOR} ")))
                .is_some_and(|state| !state.is_empty() && !state.contains(SEPARATOR)),
        }
    }

    /// The same report one year later. Years that are not numeric, or have
    /// no successor, are kept as they are.
    pub fn following_year(&self) -> Self {
        let year = self
            .year
            .parse::<i32>()
            .ok()
            .and_then(|y| y.checked_add(1))
            .map(|y| y.to_string())
            .unwrap_or_else(|| self.year.clone());
        Self::new(year, self.name.clone(), self.state.clone())
    }
}

impl fmt::Display for AnnualReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            Some(state) => write!(f, "{} {SEPARATOR} {state}", self.base_key()),
            None => f.write_str(&self.base_key()),
        }
    }
}
