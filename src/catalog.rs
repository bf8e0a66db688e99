//! Reference table of known localities, loaded once and read-only afterwards.

use std::{collections::BTreeSet, fs::File, io::Read, path::Path};

use crate::{
    error::{Error, Result},
    types::{Field, LocalityClass, LocalityRecord},
};

const WHAT: &str = "reference data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceCatalog {
    records: Vec<LocalityRecord>,
}

impl ReferenceCatalog {
    /// Loads the reference table from a CSV file with at least the columns
    /// `Town Name`, `Substation`, `Feeder Name` and `Rural/Urban`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::unavailable(WHAT, format!("cannot open {}: {e}", path.display())))?;
        let catalog = Self::from_reader(file)?;
        tracing::info!("loaded {} locality records from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers = rdr.headers().map_err(|e| Error::unavailable(WHAT, e))?.clone();
        let mut idx = [0usize; 4];
        for (slot, field) in idx.iter_mut().zip(Field::ALL) {
            *slot = headers
                .iter()
                .position(|h| h == field.column())
                .ok_or_else(|| Error::unavailable(WHAT, format!("missing column `{}`", field.column())))?;
        }

        let mut records = Vec::new();
        for (row, result) in rdr.records().enumerate() {
            let rec = result.map_err(|e| Error::unavailable(WHAT, e))?;
            let cell = |i: usize| rec.get(i).filter(|v| !v.is_empty()).map(str::to_string);
            let locality_class = match cell(idx[3]) {
                Some(v) => Some(v.parse::<LocalityClass>().map_err(|e| {
                    // header is line 1
                    Error::unavailable(WHAT, format!("line {}: {e}", row + 2))
                })?),
                None => None,
            };
            records.push(LocalityRecord {
                town: cell(idx[0]),
                substation: cell(idx[1]),
                feeder: cell(idx[2]),
                locality_class,
            });
        }

        if records.is_empty() {
            return Err(Error::unavailable(WHAT, "table has no records"));
        }
        Ok(Self { records })
    }

    pub fn from_records(records: Vec<LocalityRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[LocalityRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn towns(&self) -> Vec<String> {
        distinct(self.records.iter().filter_map(|r| r.town.as_deref()))
    }

    /// Substations seen with `town`; empty when `town` is unset or unknown.
    pub fn substations_for(&self, town: Option<&str>) -> Vec<String> {
        let Some(town) = town else { return Vec::new() };
        distinct(
            self.records
                .iter()
                .filter(|r| r.town.as_deref() == Some(town))
                .filter_map(|r| r.substation.as_deref()),
        )
    }

    /// Feeders seen with `substation`, regardless of town.
    pub fn feeders_for(&self, substation: Option<&str>) -> Vec<String> {
        let Some(substation) = substation else { return Vec::new() };
        distinct(
            self.records
                .iter()
                .filter(|r| r.substation.as_deref() == Some(substation))
                .filter_map(|r| r.feeder.as_deref()),
        )
    }

    /// Catalog-wide list, never filtered by the network hierarchy.
    pub fn locality_classes(&self) -> Vec<String> {
        distinct(self.records.iter().filter_map(|r| r.locality_class.as_ref().map(LocalityClass::as_str)))
    }
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    values.collect::<BTreeSet<_>>().into_iter().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
Date,Town Name,Substation,Feeder Name,Rural/Urban,Duration
2025-06-01,Margao,Fatorda,F2,Urban,3600
2025-06-01,Margao,Fatorda,F1,Urban,120
2025-06-02, Margao ,Navelim,N1,rural,60
2025-06-02,Ponda,Kundaim,K1,Rural,10
2025-06-03,Ponda,,K2,Urban,10
2025-06-03,,Fatorda,F3,,10
";

    fn catalog() -> ReferenceCatalog {
        ReferenceCatalog::from_reader(CSV.as_bytes()).unwrap()
    }

    #[test]
    fn towns_are_sorted_distinct_and_skip_blanks() {
        assert_eq!(catalog().towns(), vec!["Margao", "Ponda"]);
    }

    #[test]
    fn substations_filter_by_town() {
        let c = catalog();
        assert_eq!(c.substations_for(Some("Margao")), vec!["Fatorda", "Navelim"]);
        assert_eq!(c.substations_for(Some("Ponda")), vec!["Kundaim"]);
        assert!(c.substations_for(Some("Panaji")).is_empty());
        assert!(c.substations_for(None).is_empty());
    }

    #[test]
    fn feeders_filter_by_substation_only() {
        let c = catalog();
        // F3 sits on a row with no town but still belongs to Fatorda
        assert_eq!(c.feeders_for(Some("Fatorda")), vec!["F1", "F2", "F3"]);
        assert!(c.feeders_for(None).is_empty());
        assert!(c.feeders_for(Some("Nowhere")).is_empty());
    }

    #[test]
    fn locality_classes_are_global() {
        assert_eq!(catalog().locality_classes(), vec!["Rural", "Urban"]);
    }

    #[test]
    fn missing_column_is_unavailable() {
        let err = ReferenceCatalog::from_reader("Town Name,Substation,Feeder Name\nA,B,C\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::DataUnavailable { .. }), "{err}");
        assert!(err.to_string().contains("Rural/Urban"));
    }

    #[test]
    fn bad_locality_class_names_the_line() {
        let src = "Town Name,Substation,Feeder Name,Rural/Urban\nA,B,C,Urban\nA,B,D,Coastal\n";
        let err = ReferenceCatalog::from_reader(src.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 3"), "{err}");
    }

    #[test]
    fn empty_table_is_unavailable() {
        let err = ReferenceCatalog::from_reader("Town Name,Substation,Feeder Name,Rural/Urban\n".as_bytes()).unwrap_err();
        assert!(matches!(err, Error::DataUnavailable { .. }));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let err = ReferenceCatalog::load("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, Error::DataUnavailable { .. }));
    }
}
