//! Mapping of query results and event metadata into destination records.
use crate::event::CanonicalEvent;
use crate::schema::{DuplicateRecord, MetricRecord};

pub fn map_metric(event: &CanonicalEvent, indicator: &str, value: Option<String>) -> MetricRecord {
    MetricRecord {
        mfl_code: event.mfl_code,
        name: event.facility.to_owned(),
        indicator: indicator.to_owned(),
        value,
        log_date: event.log_date,
        dwapi_version: event.dwapi_version.to_owned(),
        docket: event.docket.to_owned(),
    }
}

pub fn map_duplicate(event: &CanonicalEvent, number_of_dups: i32) -> DuplicateRecord {
    DuplicateRecord {
        mfl_code: event.mfl_code,
        name: event.facility.to_owned(),
        number_of_dups,
        log_date: event.log_date,
        reporting_date: event.indicator_date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_clinic_event;

    #[test]
    fn test_map_metric() {
        let event = test_clinic_event();

        let record = map_metric(&event, "TX_CURR", Some("42".to_owned()));

        assert_eq!(
            record,
            MetricRecord {
                mfl_code: 101,
                name: "Test Clinic".to_owned(),
                indicator: "TX_CURR".to_owned(),
                value: Some("42".to_owned()),
                log_date: event.log_date,
                dwapi_version: "v1".to_owned(),
                docket: "ART".to_owned(),
            }
        );
    }

    #[test]
    fn test_map_metric_keeps_absent_value_absent() {
        let record = map_metric(&test_clinic_event(), "TX_CURR", None);

        assert_eq!(record.value, None);
    }

    #[test]
    fn test_map_duplicate_uses_indicator_date_as_reporting_date() {
        let event = test_clinic_event();

        let record = map_duplicate(&event, 3);

        assert_eq!(record.number_of_dups, 3);
        assert_eq!(record.reporting_date, event.indicator_date);
        assert_eq!(record.log_date, event.log_date);
        assert_eq!(record.name, "Test Clinic");
    }
}
