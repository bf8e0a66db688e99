//! Cascading town -> substation -> feeder selection.
//!
//! Option sets are recomputed from the catalog on every call; the selector
//! keeps nothing but the current [`Selection`].

use std::sync::Arc;

use crate::{
    catalog::ReferenceCatalog,
    error::{Error, Result},
    types::{Field, LocalityClass, OptionsOut, Selection, Stage},
};

#[derive(Debug, Clone)]
pub struct CascadingSelector {
    catalog: Arc<ReferenceCatalog>,
    selection: Selection,
}

impl CascadingSelector {
    pub fn new(catalog: Arc<ReferenceCatalog>) -> Self {
        Self { catalog, selection: Selection::default() }
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn is_complete(&self) -> bool {
        self.selection.is_complete()
    }

    pub fn stage(&self) -> Stage {
        self.selection.stage()
    }

    pub fn options_for(&self, field: Field) -> Vec<String> {
        let s = &self.selection;
        match field {
            Field::Town => self.catalog.towns(),
            Field::Substation => self.catalog.substations_for(s.town.as_deref()),
            Field::Feeder => self.catalog.feeders_for(s.substation.as_deref()),
            Field::LocalityClass => self.catalog.locality_classes(),
        }
    }

    pub fn options(&self) -> OptionsOut {
        OptionsOut {
            towns: self.options_for(Field::Town),
            substations: self.options_for(Field::Substation),
            feeders: self.options_for(Field::Feeder),
            locality_classes: self.options_for(Field::LocalityClass),
        }
    }

    pub fn set_town(&mut self, value: Option<String>) -> Result<()> {
        self.check_choice(Field::Town, value.as_deref())?;
        self.selection.town = value;
        self.cascade();
        Ok(())
    }

    pub fn set_substation(&mut self, value: Option<String>) -> Result<()> {
        if value.is_some() {
            self.check_order(Field::Substation)?;
        }
        self.check_choice(Field::Substation, value.as_deref())?;
        self.selection.substation = value;
        self.cascade();
        Ok(())
    }

    pub fn set_feeder(&mut self, value: Option<String>) -> Result<()> {
        if value.is_some() {
            self.check_order(Field::Feeder)?;
        }
        self.check_choice(Field::Feeder, value.as_deref())?;
        self.selection.feeder = value;
        Ok(())
    }

    pub fn set_locality_class(&mut self, value: Option<LocalityClass>) -> Result<()> {
        if let Some(class) = value {
            self.check_choice(Field::LocalityClass, Some(class.as_str()))?;
        }
        self.selection.locality_class = value;
        Ok(())
    }

    /// Routes a string value to the matching `set_*`.
    pub fn set(&mut self, field: Field, value: Option<String>) -> Result<()> {
        match field {
            Field::Town => self.set_town(value),
            Field::Substation => self.set_substation(value),
            Field::Feeder => self.set_feeder(value),
            Field::LocalityClass => {
                let class = value
                    .map(|v| {
                        v.parse::<LocalityClass>()
                            .map_err(|_| Error::UnknownOption { field, value: v })
                    })
                    .transpose()?;
                self.set_locality_class(class)
            }
        }
    }

    fn check_order(&self, field: Field) -> Result<()> {
        match field.prerequisite() {
            Some(requires) if self.selection.value(requires).is_none() => {
                Err(Error::InvalidSelectionOrder { field, requires })
            }
            _ => Ok(()),
        }
    }

    fn check_choice(&self, field: Field, value: Option<&str>) -> Result<()> {
        match value {
            Some(v) if !self.options_for(field).iter().any(|o| o == v) => {
                Err(Error::UnknownOption { field, value: v.to_string() })
            }
            _ => Ok(()),
        }
    }

    /// Drops downstream values that fell out of their option sets. Substation
    /// goes first so a feeder under a dropped substation goes with it.
    fn cascade(&mut self) {
        for field in [Field::Substation, Field::Feeder] {
            let stale = match self.selection.value(field) {
                Some(v) => !self.options_for(field).iter().any(|o| o == v),
                None => false,
            };
            if stale {
                tracing::debug!("resetting {field} after upstream change");
                match field {
                    Field::Substation => self.selection.substation = None,
                    _ => self.selection.feeder = None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LocalityRecord;

    fn selector() -> CascadingSelector {
        let catalog = ReferenceCatalog::from_records(vec![
            LocalityRecord::new("Margao", "Fatorda", "F1", LocalityClass::Urban),
            LocalityRecord::new("Margao", "Fatorda", "F2", LocalityClass::Urban),
            LocalityRecord::new("Margao", "Navelim", "N1", LocalityClass::Rural),
            LocalityRecord::new("Navelim", "Navelim", "N2", LocalityClass::Rural),
            LocalityRecord::new("Ponda", "Kundaim", "K1", LocalityClass::Rural),
        ]);
        CascadingSelector::new(Arc::new(catalog))
    }

    #[test]
    fn dependent_fields_start_empty() {
        let s = selector();
        assert_eq!(s.options_for(Field::Town), vec!["Margao", "Navelim", "Ponda"]);
        assert!(s.options_for(Field::Substation).is_empty());
        assert!(s.options_for(Field::Feeder).is_empty());
        assert_eq!(s.options_for(Field::LocalityClass), vec!["Rural", "Urban"]);
        assert_eq!(s.stage(), Stage::Empty);
    }

    #[test]
    fn substation_before_town_is_rejected() {
        let mut s = selector();
        let err = s.set_substation(Some("Fatorda".into())).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidSelectionOrder { field: Field::Substation, requires: Field::Town }
        ));
        let err = s.set_feeder(Some("F1".into())).unwrap_err();
        assert!(matches!(err, Error::InvalidSelectionOrder { field: Field::Feeder, .. }));
        assert_eq!(s.selection(), &Selection::default());
    }

    #[test]
    fn unknown_choice_leaves_selection_untouched() {
        let mut s = selector();
        s.set_town(Some("Margao".into())).unwrap();
        let err = s.set_substation(Some("Kundaim".into())).unwrap_err();
        assert!(matches!(err, Error::UnknownOption { field: Field::Substation, .. }));
        assert_eq!(s.selection().substation, None);
        assert!(s.set_town(Some("Panaji".into())).is_err());
        assert_eq!(s.selection().town.as_deref(), Some("Margao"));
    }

    #[test]
    fn changing_town_resets_substation_and_feeder() {
        let mut s = selector();
        s.set_town(Some("Margao".into())).unwrap();
        s.set_substation(Some("Fatorda".into())).unwrap();
        s.set_feeder(Some("F2".into())).unwrap();
        s.set_town(Some("Ponda".into())).unwrap();
        assert_eq!(s.selection().substation, None);
        assert_eq!(s.selection().feeder, None);
        assert_eq!(s.stage(), Stage::TownChosen);
    }

    #[test]
    fn changing_town_keeps_substation_still_offered() {
        let mut s = selector();
        s.set_town(Some("Margao".into())).unwrap();
        s.set_substation(Some("Navelim".into())).unwrap();
        s.set_feeder(Some("N1".into())).unwrap();
        s.set_town(Some("Navelim".into())).unwrap();
        // Navelim substation exists under both towns and feeders key on substation only
        assert_eq!(s.selection().substation.as_deref(), Some("Navelim"));
        assert_eq!(s.selection().feeder.as_deref(), Some("N1"));
    }

    #[test]
    fn clearing_substation_clears_feeder() {
        let mut s = selector();
        s.set_town(Some("Margao".into())).unwrap();
        s.set_substation(Some("Fatorda".into())).unwrap();
        s.set_feeder(Some("F1".into())).unwrap();
        s.set_substation(None).unwrap();
        assert_eq!(s.selection().feeder, None);
        assert!(s.options_for(Field::Feeder).is_empty());
    }

    #[test]
    fn locality_class_is_independent() {
        let mut s = selector();
        s.set_locality_class(Some(LocalityClass::Urban)).unwrap();
        s.set_town(Some("Ponda".into())).unwrap();
        s.set_substation(Some("Kundaim".into())).unwrap();
        s.set_feeder(Some("K1".into())).unwrap();
        // Ponda only has rural rows, Urban stays selectable
        assert!(s.is_complete());
        s.set_town(Some("Margao".into())).unwrap();
        assert_eq!(s.selection().locality_class, Some(LocalityClass::Urban));
        assert!(!s.is_complete());
    }

    #[test]
    fn set_routes_by_field() {
        let mut s = selector();
        s.set(Field::LocalityClass, Some("rural".into())).unwrap();
        assert_eq!(s.selection().locality_class, Some(LocalityClass::Rural));
        let err = s.set(Field::LocalityClass, Some("coastal".into())).unwrap_err();
        assert!(matches!(err, Error::UnknownOption { field: Field::LocalityClass, .. }));
        s.set(Field::Town, Some("Ponda".into())).unwrap();
        assert_eq!(s.options().substations, vec!["Kundaim"]);
    }
}
