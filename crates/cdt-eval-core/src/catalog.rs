//! Static test catalog, loaded once at startup.

use crate::errors::CatalogError;
use crate::model::{CodeSet, TestCase};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

const EMBEDDED_CATALOG: &str = include_str!("../catalog/cdt_cases.yaml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCatalog {
    #[serde(default = "default_version")]
    pub version: u32,
    pub cases: Vec<TestCase>,
}

fn default_version() -> u32 {
    1
}

impl TestCatalog {
    pub fn embedded() -> Result<Self, CatalogError> {
        Self::from_yaml_str(EMBEDDED_CATALOG, "<embedded>")
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|e| CatalogError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&raw, &path.display().to_string())
    }

    pub fn from_yaml_str(raw: &str, origin: &str) -> Result<Self, CatalogError> {
        let catalog: TestCatalog =
            serde_yaml::from_str(raw).map_err(|e| CatalogError::Parse {
                path: origin.to_string(),
                message: e.to_string(),
            })?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_cases(cases: Vec<TestCase>) -> Result<Self, CatalogError> {
        let catalog = Self {
            version: default_version(),
            cases,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Ids must be unique, inputs non-empty, and every case must expect at least one code.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.cases.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut seen = HashSet::new();
        for case in &self.cases {
            if !seen.insert(case.id.as_str()) {
                return Err(CatalogError::DuplicateId(case.id.clone()));
            }
            if case.input.trim().is_empty() {
                return Err(CatalogError::EmptyInput(case.id.clone()));
            }
            if case.expected_codes.is_empty() {
                return Err(CatalogError::EmptyExpected(case.id.clone()));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&TestCase> {
        self.cases.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> BTreeSet<String> {
        self.cases.iter().map(|c| c.id.clone()).collect()
    }

    /// Cases whose id is in `ids`, in catalog order.
    pub fn select(&self, ids: &BTreeSet<String>) -> Vec<TestCase> {
        self.cases
            .iter()
            .filter(|c| ids.contains(&c.id))
            .cloned()
            .collect()
    }

    pub fn by_category(&self, category: &str) -> Result<Vec<TestCase>, CatalogError> {
        let cases: Vec<TestCase> = self
            .cases
            .iter()
            .filter(|c| c.in_category(category))
            .cloned()
            .collect();
        if cases.is_empty() {
            return Err(CatalogError::UnknownCategory(category.to_string()));
        }
        Ok(cases)
    }

    /// Category name -> number of cases tagged with it.
    pub fn categories(&self) -> BTreeMap<String, usize> {
        let mut out = BTreeMap::new();
        for case in &self.cases {
            for cat in &case.categories {
                *out.entry(cat.to_ascii_lowercase()).or_insert(0) += 1;
            }
        }
        out
    }

    /// Expected codes that do not appear in `known`, with the ids that reference them.
    pub fn missing_codes(&self, known: &CodeSet) -> BTreeMap<String, Vec<String>> {
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for case in &self.cases {
            for code in case.expected_codes.difference(known) {
                out.entry(code.clone()).or_default().push(case.id.clone());
            }
        }
        out
    }
}

#[derive(Debug, Deserialize)]
struct CodeTableEntry {
    code: String,
}

/// Read the code column of a code-description table (JSON array of `{"code": ..}` objects).
pub fn load_code_table(path: &Path) -> Result<CodeSet, CatalogError> {
    let raw = std::fs::read_to_string(path).map_err(|e| CatalogError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let entries: Vec<CodeTableEntry> =
        serde_json::from_str(&raw).map_err(|e| CatalogError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    Ok(entries.into_iter().map(|e| e.code.trim().to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::code_set;

    fn case(id: &str, categories: &[&str], expected: &[&str]) -> TestCase {
        TestCase {
            id: id.to_string(),
            name: String::new(),
            categories: categories.iter().map(|s| s.to_string()).collect(),
            input: format!("procedure for {}", id),
            expected_codes: code_set(expected.iter().copied()),
            expected_descriptions: vec![],
        }
    }

    #[test]
    fn embedded_catalog_is_valid() {
        let catalog = TestCatalog::embedded().unwrap();
        assert_eq!(catalog.len(), 28);
        let checkup = catalog.get("standard-adult-checkup-cleaning").unwrap();
        assert_eq!(checkup.expected_codes, code_set(["D0120", "D1110"]));
        assert!(catalog.categories().contains_key("pediatric"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = TestCatalog::from_cases(vec![
            case("a", &["x"], &["D0120"]),
            case("a", &["x"], &["D1110"]),
        ])
        .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateId(id) if id == "a"));
    }

    #[test]
    fn empty_expected_is_rejected() {
        let err = TestCatalog::from_cases(vec![case("a", &["x"], &[])]).unwrap_err();
        assert!(matches!(err, CatalogError::EmptyExpected(_)));
    }

    #[test]
    fn category_filter_is_case_insensitive() {
        let catalog = TestCatalog::from_cases(vec![
            case("a", &["surgical"], &["D7140"]),
            case("b", &["Surgical", "emergency"], &["D7520"]),
            case("c", &["preventive"], &["D1110"]),
        ])
        .unwrap();
        let ids: Vec<_> = catalog
            .by_category("SURGICAL")
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(matches!(
            catalog.by_category("implant"),
            Err(CatalogError::UnknownCategory(_))
        ));
    }

    #[test]
    fn missing_codes_groups_by_code() {
        let catalog = TestCatalog::from_cases(vec![
            case("a", &["x"], &["D0120", "D9999"]),
            case("b", &["x"], &["D9999"]),
        ])
        .unwrap();
        let missing = catalog.missing_codes(&code_set(["D0120"]));
        assert_eq!(missing.len(), 1);
        assert_eq!(missing["D9999"], vec!["a", "b"]);
    }

    #[test]
    fn code_table_reads_code_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cdt_codes.json");
        std::fs::write(
            &path,
            r#"[{"code": "D0120", "description": "Periodic oral evaluation"}, {"code": " D1110 "}]"#,
        )
        .unwrap();
        assert_eq!(load_code_table(&path).unwrap(), code_set(["D0120", "D1110"]));
    }
}
