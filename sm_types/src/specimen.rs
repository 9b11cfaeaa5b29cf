use crate::constants::{
    ADDSTR, DERVSTR, DRAWDD, DRAWDM, DRAWDY, GUSPEC, LSTUDY, NOT_APPLICABLE, PRIMSTR,
    STANDARD_COLS, TXTPID, VIDVAL,
};
use crate::schema::{cast_float, cast_int, cast_text, Cell, SchemaError};
use chrono::NaiveDate;
use io_utils::Table;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

/// Globally unique identifier of one specimen aliquot ("guspec").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecimenId(String);

impl SpecimenId {
    pub fn new(id: impl Into<String>) -> SpecimenId {
        SpecimenId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpecimenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SpecimenId {
    fn from(s: &str) -> Self {
        SpecimenId(s.to_string())
    }
}

impl From<String> for SpecimenId {
    fn from(s: String) -> Self {
        SpecimenId(s)
    }
}

impl Borrow<str> for SpecimenId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// One registry row for one specimen aliquot.
///
/// Field order is the composite sort key used when aligning two snapshots, so
/// the derived `Ord` sorts by specimen id, then patient, draw month/day/year,
/// visit, protocol and the three specimen codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpecimenRecord {
    pub specimen_id: SpecimenId,
    pub patient_id: Option<String>,
    pub draw_month: Option<i64>,
    pub draw_day: Option<i64>,
    pub draw_year: Option<i64>,
    pub visit_value: Option<OrderedFloat<f64>>,
    pub protocol_id: Option<OrderedFloat<f64>>,
    pub primary_spec_code: Option<String>,
    pub additive_code: Option<String>,
    pub derivative_code: Option<String>,
    /// Columns outside the registry schema, kept as text.
    pub extra: BTreeMap<String, Option<String>>,
}

impl SpecimenRecord {
    /// A record with only the specimen id set.
    pub fn new(specimen_id: impl Into<SpecimenId>) -> SpecimenRecord {
        SpecimenRecord {
            specimen_id: specimen_id.into(),
            patient_id: None,
            draw_month: None,
            draw_day: None,
            draw_year: None,
            visit_value: None,
            protocol_id: None,
            primary_spec_code: None,
            additive_code: None,
            derivative_code: None,
            extra: BTreeMap::new(),
        }
    }

    /// Build a record from data row `row` of `table`, casting every registry
    /// column to its declared type.
    pub fn from_table_row(table: &Table, row: usize) -> Result<SpecimenRecord, SchemaError> {
        let line = row + 2;
        let cell = |column: &'static str| Cell {
            path: table.path(),
            line,
            column,
        };
        let Some(specimen_id) = table.get(row, GUSPEC) else {
            return Err(SchemaError::MissingSpecimenId {
                path: table.path().to_path_buf(),
                line,
            });
        };

        let extra = table
            .headers()
            .iter()
            .filter(|h| !STANDARD_COLS.contains(&h.as_str()))
            .map(|h| (h.clone(), cast_text(table.get(row, h))))
            .collect();

        Ok(SpecimenRecord {
            specimen_id: SpecimenId::new(specimen_id),
            patient_id: cast_text(table.get(row, TXTPID)),
            draw_month: cast_int(cell(DRAWDM), table.get(row, DRAWDM))?,
            draw_day: cast_int(cell(DRAWDD), table.get(row, DRAWDD))?,
            draw_year: cast_int(cell(DRAWDY), table.get(row, DRAWDY))?,
            visit_value: cast_float(cell(VIDVAL), table.get(row, VIDVAL))?,
            protocol_id: cast_float(cell(LSTUDY), table.get(row, LSTUDY))?,
            primary_spec_code: cast_text(table.get(row, PRIMSTR)),
            additive_code: cast_text(table.get(row, ADDSTR)),
            derivative_code: cast_text(table.get(row, DERVSTR)),
            extra,
        })
    }

    /// Copy of this record with every "not applicable" text value replaced by a
    /// missing value.
    pub fn normalized(&self) -> SpecimenRecord {
        fn clean(v: &Option<String>) -> Option<String> {
            v.as_deref()
                .filter(|v| *v != NOT_APPLICABLE)
                .map(str::to_string)
        }
        SpecimenRecord {
            specimen_id: self.specimen_id.clone(),
            patient_id: clean(&self.patient_id),
            draw_month: self.draw_month,
            draw_day: self.draw_day,
            draw_year: self.draw_year,
            visit_value: self.visit_value,
            protocol_id: self.protocol_id,
            primary_spec_code: clean(&self.primary_spec_code),
            additive_code: clean(&self.additive_code),
            derivative_code: clean(&self.derivative_code),
            extra: self.extra.iter().map(|(k, v)| (k.clone(), clean(v))).collect(),
        }
    }

    /// Draw date assembled from the month/day/year components, if all are present and valid.
    pub fn draw_date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(
            i32::try_from(self.draw_year?).ok()?,
            u32::try_from(self.draw_month?).ok()?,
            u32::try_from(self.draw_day?).ok()?,
        )
    }

    /// Render the value of `column` the way it is written to a snapshot file.
    pub fn value(&self, column: &str) -> Option<String> {
        match column {
            GUSPEC => Some(self.specimen_id.to_string()),
            TXTPID => self.patient_id.clone(),
            DRAWDM => self.draw_month.map(|v| v.to_string()),
            DRAWDD => self.draw_day.map(|v| v.to_string()),
            DRAWDY => self.draw_year.map(|v| v.to_string()),
            VIDVAL => self.visit_value.map(|v| format!("{:?}", v.0)),
            LSTUDY => self.protocol_id.map(|v| format!("{:?}", v.0)),
            PRIMSTR => self.primary_spec_code.clone(),
            ADDSTR => self.additive_code.clone(),
            DERVSTR => self.derivative_code.clone(),
            _ => self.extra.get(column).cloned().flatten(),
        }
    }

    /// Values of `columns`, in order, for writing one row.
    pub fn to_row<S: AsRef<str>>(&self, columns: &[S]) -> Vec<Option<String>> {
        columns.iter().map(|c| self.value(c.as_ref())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn write(dir: &std::path::Path, body: &str) -> Result<Table> {
        let path = dir.join("snap.csv");
        std::fs::write(&path, body)?;
        Table::read(&path)
    }

    #[test]
    fn test_from_table_row_casts_types() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let table = write(
            dir.path(),
            "txtpid,drawdm,drawdd,drawdy,vidval,lstudy,guspec,primstr,addstr,dervstr\n\
             110,1.0,2,2024,3,302.0,S1,BLD,HEP,PLA\n\
             111,,,,,302,S2,N/A,,\n",
        )?;
        let r = SpecimenRecord::from_table_row(&table, 0)?;
        assert_eq!(r.specimen_id.as_str(), "S1");
        assert_eq!(r.patient_id.as_deref(), Some("110"));
        assert_eq!(r.draw_month, Some(1));
        assert_eq!(r.visit_value, Some(OrderedFloat(3.0)));
        assert_eq!(r.protocol_id, Some(OrderedFloat(302.0)));
        assert_eq!(r.draw_date(), NaiveDate::from_ymd_opt(2024, 1, 2));
        assert!(r.extra.is_empty());

        let r2 = SpecimenRecord::from_table_row(&table, 1)?;
        assert_eq!(r2.draw_date(), None);
        assert_eq!(r2.primary_spec_code.as_deref(), Some(NOT_APPLICABLE));
        assert_eq!(r2.normalized().primary_spec_code, None);
        Ok(())
    }

    #[test]
    fn test_missing_specimen_id() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let table = write(dir.path(), "guspec,txtpid\n,110\n")?;
        assert!(matches!(
            SpecimenRecord::from_table_row(&table, 0),
            Err(SchemaError::MissingSpecimenId { line: 2, .. })
        ));
        Ok(())
    }

    #[test]
    fn test_bad_number_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let table = write(dir.path(), "guspec,drawdy\nS1,twenty\n")?;
        assert!(SpecimenRecord::from_table_row(&table, 0).is_err());
        Ok(())
    }

    #[test]
    fn test_value_rendering() {
        let r = SpecimenRecord {
            draw_year: Some(2024),
            protocol_id: Some(OrderedFloat(302.0)),
            ..SpecimenRecord::new("S1")
        };
        assert_eq!(
            r.to_row(&["guspec", "drawdy", "lstudy", "dervstr"]),
            vec![
                Some("S1".to_string()),
                Some("2024".to_string()),
                Some("302.0".to_string()),
                None
            ]
        );
    }

    #[test]
    fn test_sort_order_follows_composite_key() {
        let a = SpecimenRecord {
            derivative_code: Some("SER".into()),
            ..SpecimenRecord::new("S1")
        };
        let b = SpecimenRecord {
            derivative_code: Some("PLA".into()),
            ..SpecimenRecord::new("S1")
        };
        let c = SpecimenRecord::new("S0");
        let mut v = vec![a.clone(), b.clone(), c.clone()];
        v.sort();
        assert_eq!(v, vec![c, b, a]);
    }
}
