use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::session::SessionRecord;
use crate::schema::Field;

/// Fields that are both mapped by the schema and present in the loaded file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnSet(BTreeSet<Field>);

impl ColumnSet {
    pub fn all() -> Self {
        Self(Field::ALL.into_iter().collect())
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0.contains(&field)
    }

    pub fn insert(&mut self, field: Field) {
        self.0.insert(field);
    }

    pub fn without(mut self, field: Field) -> Self {
        self.0.remove(&field);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = Field> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Field> for ColumnSet {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Immutable in-memory session table.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    records: Vec<SessionRecord>,
    columns: ColumnSet,
}

impl Dataset {
    pub fn new(records: Vec<SessionRecord>, columns: ColumnSet) -> Self {
        Self { records, columns }
    }

    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }

    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// First and last calendar day covered by the data.
    pub fn date_span(&self) -> Option<(NaiveDate, NaiveDate)> {
        let min = self.records.iter().map(|r| r.date()).min()?;
        let max = self.records.iter().map(|r| r.date()).max()?;
        Some((min, max))
    }

    /// Unfiltered view over every row.
    pub fn view(&self) -> SessionView<'_> {
        SessionView {
            rows: self.records.iter().collect(),
            columns: &self.columns,
        }
    }
}

/// A borrowed selection of rows from a [`Dataset`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView<'a> {
    rows: Vec<&'a SessionRecord>,
    columns: &'a ColumnSet,
}

impl<'a> SessionView<'a> {
    pub fn rows(&self) -> &[&'a SessionRecord] {
        &self.rows
    }

    pub fn columns(&self) -> &'a ColumnSet {
        self.columns
    }

    pub fn has(&self, field: Field) -> bool {
        self.columns.contains(field)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// New view keeping only the rows matching `pred`.
    pub fn retain<F>(&self, mut pred: F) -> SessionView<'a>
    where
        F: FnMut(&SessionRecord) -> bool,
    {
        SessionView {
            rows: self.rows.iter().copied().filter(|r| pred(r)).collect(),
            columns: self.columns,
        }
    }
}
