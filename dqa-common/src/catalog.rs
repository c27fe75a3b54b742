use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::CatalogConfig;
use crate::error::CatalogError;

/// A named indicator and the parameterized query that computes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorDefinition {
    pub name: String,
    pub query: String,
}

impl IndicatorDefinition {
    pub fn new(name: &str, query: &str) -> Self {
        Self {
            name: name.to_owned(),
            query: query.to_owned(),
        }
    }
}

/// All query templates the pipeline runs, loaded once at startup.
///
/// Indicators are kept in configuration order, which is the order they run in.
#[derive(Debug, Clone)]
pub struct IndicatorCatalog {
    indicators: Vec<IndicatorDefinition>,
    duplicate_query: String,
}

impl IndicatorCatalog {
    pub fn new(
        indicators: Vec<IndicatorDefinition>,
        duplicate_query: &str,
    ) -> Result<Self, CatalogError> {
        for (position, indicator) in indicators.iter().enumerate() {
            if indicators[..position]
                .iter()
                .any(|seen| seen.name == indicator.name)
            {
                return Err(CatalogError::DuplicateIndicator(indicator.name.to_owned()));
            }
        }

        Ok(Self {
            indicators,
            duplicate_query: duplicate_query.to_owned(),
        })
    }

    /// Read `<QUERIES_DIR>/<NAME>.sql` for every configured indicator and for the duplicate query.
    pub fn load(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let dir = config.queries_dir.as_path();

        let indicators = config
            .indicators
            .names()
            .iter()
            .map(|name| {
                read_template(dir, name).map(|query| IndicatorDefinition {
                    name: name.to_uppercase(),
                    query,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let duplicate_query = read_template(dir, config.duplicate_query.as_str())?;

        info!(
            indicators = indicators.len(),
            dir = %dir.display(),
            "loaded query templates"
        );

        Self::new(indicators, &duplicate_query)
    }

    pub fn indicators(&self) -> &[IndicatorDefinition] {
        &self.indicators
    }

    pub fn duplicate_query(&self) -> &str {
        &self.duplicate_query
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }
}

fn template_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.sql", name.to_uppercase()))
}

fn read_template(dir: &Path, name: &str) -> Result<String, CatalogError> {
    let path = template_path(dir, name);
    let query = fs::read_to_string(&path).map_err(|error| CatalogError::ReadError {
        path: path.display().to_string(),
        error,
    })?;

    if query.trim().is_empty() {
        return Err(CatalogError::EmptyTemplate(path.display().to_string()));
    }

    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndicatorList, NonEmptyString};

    /// A scratch directory unique to one test, removed on drop.
    struct QueriesDir(PathBuf);

    impl QueriesDir {
        fn new(test_name: &str) -> Self {
            let dir = std::env::temp_dir().join(format!(
                "dqa-catalog-{}-{}",
                test_name,
                std::process::id()
            ));
            fs::create_dir_all(&dir).expect("failed to create queries dir");
            Self(dir)
        }

        fn write(&self, file_name: &str, contents: &str) {
            fs::write(self.0.join(file_name), contents).expect("failed to write template");
        }

        fn config(&self, indicators: &str) -> CatalogConfig {
            CatalogConfig {
                queries_dir: self.0.clone(),
                indicators: indicators.parse::<IndicatorList>().unwrap(),
                duplicate_query: "PATIENT_DUPLICATES".parse::<NonEmptyString>().unwrap(),
            }
        }
    }

    impl Drop for QueriesDir {
        fn drop(&mut self) {
            drop(fs::remove_dir_all(&self.0));
        }
    }

    #[test]
    fn test_load_keeps_configuration_order() {
        let dir = QueriesDir::new("order");
        dir.write("TX_CURR.sql", "SELECT count(*) FROM tx_curr WHERE mfl_code = :mfl_code");
        dir.write("HTS_TESTED.sql", "SELECT count(*) FROM hts WHERE mfl_code = :mfl_code");
        dir.write("PATIENT_DUPLICATES.sql", "SELECT 0");

        let catalog = IndicatorCatalog::load(&dir.config("tx_curr,hts_tested")).unwrap();

        let names: Vec<&str> = catalog
            .indicators()
            .iter()
            .map(|indicator| indicator.name.as_str())
            .collect();
        assert_eq!(names, vec!["TX_CURR", "HTS_TESTED"]);
        assert_eq!(
            catalog.indicators()[1].query,
            "SELECT count(*) FROM hts WHERE mfl_code = :mfl_code"
        );
        assert_eq!(catalog.duplicate_query(), "SELECT 0");
    }

    #[test]
    fn test_load_missing_template() {
        let dir = QueriesDir::new("missing");
        dir.write("PATIENT_DUPLICATES.sql", "SELECT 0");

        let error = IndicatorCatalog::load(&dir.config("TX_CURR")).unwrap_err();

        assert!(matches!(error, CatalogError::ReadError { ref path, .. } if path.ends_with("TX_CURR.sql")));
    }

    #[test]
    fn test_load_empty_template() {
        let dir = QueriesDir::new("empty");
        dir.write("TX_CURR.sql", "  \n");
        dir.write("PATIENT_DUPLICATES.sql", "SELECT 0");

        let error = IndicatorCatalog::load(&dir.config("TX_CURR")).unwrap_err();

        assert!(matches!(error, CatalogError::EmptyTemplate(_)));
    }

    #[test]
    fn test_bundled_templates_bind() {
        let config = CatalogConfig {
            queries_dir: Path::new(env!("CARGO_MANIFEST_DIR")).join("../Queries"),
            indicators: "TX_CURR".parse::<IndicatorList>().unwrap(),
            duplicate_query: "PATIENT_DUPLICATES".parse::<NonEmptyString>().unwrap(),
        };

        let catalog = IndicatorCatalog::load(&config).unwrap();

        assert!(catalog.indicators()[0].query.contains(":mfl_code"));
        assert!(catalog.duplicate_query().contains(":reporting_date"));
    }

    #[test]
    fn test_duplicate_indicator_names() {
        let error = IndicatorCatalog::new(
            vec![
                IndicatorDefinition::new("TX_CURR", "SELECT 1"),
                IndicatorDefinition::new("TX_CURR", "SELECT 2"),
            ],
            "SELECT 0",
        )
        .unwrap_err();

        assert!(matches!(error, CatalogError::DuplicateIndicator(name) if name == "TX_CURR"));
    }
}
