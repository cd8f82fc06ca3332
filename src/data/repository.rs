use rusqlite::{params, Connection, Row};

use crate::error::AppError;
use crate::models::{ProjectDate, ProjectFamily, ProjectRecord, PumpPressure, SampleRecord};

const SAMPLE_COLUMNS: &str = "sample_name, project_id, creation_date, vial, injection_volume,
     initial_pressure_pump, min_pressure_pump, max_pressure_pump, std_pressure_pump,
     analyzer_temp_mean, analyzer_temp_std, error_tag";

pub fn insert_project(conn: &Connection, project: &ProjectRecord) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO projects (project_id, project_date, instrument, software_version, method, hplc_type, time_range, faims_attached)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            project.project_id,
            project.project_date,
            project.instrument,
            project.software_version,
            project.method,
            project.hplc_type,
            project.time_range,
            project.faims_attached,
        ],
    )
    .map_err(|e| AppError::on_insert(e, &project.project_id))?;
    Ok(())
}

pub fn insert_sample(conn: &Connection, sample: &SampleRecord) -> Result<(), AppError> {
    let pump = sample.pump_pressure;
    conn.execute(
        &format!(
            "INSERT INTO samples ({SAMPLE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ),
        params![
            sample.sample_name,
            sample.project_id,
            sample.creation_date,
            sample.vial,
            sample.injection_volume,
            pump.map(|p| p.initial),
            pump.map(|p| p.min),
            pump.map(|p| p.max),
            pump.map(|p| p.std),
            sample.analyzer_temp_mean,
            sample.analyzer_temp_std,
            sample.error_tag,
        ],
    )
    .map_err(|e| AppError::on_insert(e, &sample.sample_name))?;
    Ok(())
}

pub fn insert_corrupt_sample(
    conn: &Connection,
    sample_name: &str,
    project_id: &str,
    error_tag: &str,
) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO samples (sample_name, project_id, error_tag) VALUES (?1, ?2, ?3)",
        params![sample_name, project_id, error_tag],
    )
    .map_err(|e| AppError::on_insert(e, sample_name))?;
    Ok(())
}

/// Overwrites every column of an existing sample row, including the error tag.
pub fn update_sample(conn: &Connection, sample: &SampleRecord) -> Result<usize, AppError> {
    let pump = sample.pump_pressure;
    let count = conn.execute(
        "UPDATE samples SET project_id = ?1, creation_date = ?2, vial = ?3, injection_volume = ?4,
             initial_pressure_pump = ?5, min_pressure_pump = ?6, max_pressure_pump = ?7,
             std_pressure_pump = ?8, analyzer_temp_mean = ?9, analyzer_temp_std = ?10,
             error_tag = ?11
         WHERE sample_name = ?12",
        params![
            sample.project_id,
            sample.creation_date,
            sample.vial,
            sample.injection_volume,
            pump.map(|p| p.initial),
            pump.map(|p| p.min),
            pump.map(|p| p.max),
            pump.map(|p| p.std),
            sample.analyzer_temp_mean,
            sample.analyzer_temp_std,
            sample.error_tag,
            sample.sample_name,
        ],
    )?;
    Ok(count)
}

pub fn count_projects(conn: &Connection, project_id: &str) -> Result<i64, AppError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM projects WHERE project_id = ?1",
        params![project_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn find_family_projects(
    conn: &Connection,
    family: &ProjectFamily,
) -> Result<Vec<ProjectDate>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT project_id, project_date FROM projects
         WHERE project_id LIKE ?1 ESCAPE '\\'
         ORDER BY project_date ASC, project_id ASC",
    )?;

    let rows = stmt
        .query_map(params![family.like_pattern()], |row| {
            Ok(ProjectDate {
                project_id: row.get(0)?,
                project_date: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Most recently created sample committed under any project of the family.
pub fn latest_family_sample(
    conn: &Connection,
    family: &ProjectFamily,
) -> Result<Option<SampleRecord>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SAMPLE_COLUMNS} FROM samples
         WHERE project_id LIKE ?1 ESCAPE '\\' AND creation_date IS NOT NULL
         ORDER BY creation_date DESC LIMIT 1"
    ))?;

    let sample = stmt
        .query_row(params![family.like_pattern()], sample_from_row)
        .optional()?;
    Ok(sample)
}

pub fn sample_exists(conn: &Connection, sample_name: &str) -> Result<bool, AppError> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM samples WHERE sample_name = ?1)",
        params![sample_name],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn get_sample(conn: &Connection, sample_name: &str) -> Result<Option<SampleRecord>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SAMPLE_COLUMNS} FROM samples WHERE sample_name = ?1"
    ))?;
    let sample = stmt
        .query_row(params![sample_name], sample_from_row)
        .optional()?;
    Ok(sample)
}

pub fn get_project(conn: &Connection, project_id: &str) -> Result<Option<ProjectRecord>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT project_id, project_date, instrument, software_version, method, hplc_type, time_range, faims_attached
         FROM projects WHERE project_id = ?1",
    )?;

    let project = stmt
        .query_row(params![project_id], |row| {
            Ok(ProjectRecord {
                project_id: row.get(0)?,
                project_date: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                instrument: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                software_version: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                method: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                hplc_type: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                time_range: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                faims_attached: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            })
        })
        .optional()?;

    Ok(project)
}

/// Subset of `names` that already exist as sample keys.
pub fn list_sample_keys_in(conn: &Connection, names: &[String]) -> Result<Vec<String>, AppError> {
    let mut stmt = conn.prepare("SELECT sample_name FROM samples WHERE sample_name = ?1")?;
    let mut found = Vec::new();
    for name in names {
        if let Some(key) = stmt
            .query_row(params![name], |row| row.get::<_, String>(0))
            .optional()?
        {
            found.push(key);
        }
    }
    Ok(found)
}

/// Left anti-join of `names` against the sample keys through the scratch table. The
/// scratch table is emptied before and after, inside one transaction.
pub fn missing_sample_names(conn: &Connection, names: &[String]) -> Result<Vec<String>, AppError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM scan_scratch", [])?;
    {
        let mut insert = tx.prepare("INSERT INTO scan_scratch (file_name) VALUES (?1)")?;
        for name in names {
            insert.execute(params![name])?;
        }
    }

    let missing = {
        let mut stmt = tx.prepare(
            "SELECT scan_scratch.file_name FROM scan_scratch
             LEFT JOIN samples ON scan_scratch.file_name = samples.sample_name
             WHERE samples.sample_name IS NULL
             ORDER BY scan_scratch.file_name",
        )?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    tx.execute("DELETE FROM scan_scratch", [])?;
    tx.commit()?;
    Ok(missing)
}

pub fn scratch_row_count(conn: &Connection) -> Result<i64, AppError> {
    let count = conn.query_row("SELECT COUNT(*) FROM scan_scratch", [], |row| row.get(0))?;
    Ok(count)
}

/// Distinct `YYYYMM` buckets covered by committed project date codes.
pub fn project_months(conn: &Connection) -> Result<Vec<String>, AppError> {
    let mut stmt = conn.prepare("SELECT DISTINCT project_date FROM projects")?;
    let mut months: Vec<String> = stmt
        .query_map([], |row| row.get::<_, Option<String>>(0))?
        .filter_map(|r| r.ok().flatten())
        .filter(|date| date.len() >= 6 && date[..6].chars().all(|c| c.is_ascii_digit()))
        .map(|date| date[..6].to_string())
        .collect();
    months.sort();
    months.dedup();
    Ok(months)
}

fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<SampleRecord> {
    let pump = match (
        row.get::<_, Option<f64>>(5)?,
        row.get::<_, Option<f64>>(6)?,
        row.get::<_, Option<f64>>(7)?,
        row.get::<_, Option<f64>>(8)?,
    ) {
        (Some(initial), Some(min), Some(max), Some(std)) => Some(PumpPressure {
            initial,
            min,
            max,
            std,
        }),
        _ => None,
    };

    Ok(SampleRecord {
        sample_name: row.get(0)?,
        project_id: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        creation_date: row.get(2)?,
        vial: row.get(3)?,
        injection_volume: row.get(4)?,
        pump_pressure: pump,
        analyzer_temp_mean: row.get(9)?,
        analyzer_temp_std: row.get(10)?,
        error_tag: row.get(11)?,
    })
}

// Needed for rusqlite optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::migrations::run_migrations;
    use crate::models::ProjectId;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn project(id: &str) -> ProjectRecord {
        ProjectRecord {
            project_id: id.to_string(),
            project_date: id.split('_').nth(1).unwrap().to_string(),
            instrument: "HFX".to_string(),
            software_version: "2.9".to_string(),
            method: "C:/methods/dia_60min.meth".to_string(),
            hplc_type: "Neo".to_string(),
            time_range: "0-60".to_string(),
            faims_attached: "notRecorded".to_string(),
        }
    }

    fn sample(name: &str, project_id: &str, created: &str) -> SampleRecord {
        SampleRecord {
            sample_name: name.to_string(),
            project_id: project_id.to_string(),
            creation_date: Some(created.to_string()),
            vial: Some("S1:A1".to_string()),
            injection_volume: Some(1.0),
            pump_pressure: Some(PumpPressure {
                initial: 210.0,
                min: 180.0,
                max: 250.0,
                std: 4.5,
            }),
            analyzer_temp_mean: Some(28.1),
            analyzer_temp_std: Some(0.02),
            error_tag: None,
        }
    }

    fn family(name: &str) -> ProjectFamily {
        ProjectId::from_sample_name(name).unwrap().family()
    }

    #[test]
    fn test_sample_crud() {
        let conn = setup_db();
        insert_project(&conn, &project("HFX_20250310_AB")).unwrap();
        let s = sample("HFX_20250310_AB_S01.raw", "HFX_20250310_AB", "2025-03-10 09:00:00.000");
        insert_sample(&conn, &s).unwrap();

        let fetched = get_sample(&conn, &s.sample_name).unwrap().unwrap();
        assert_eq!(fetched, s);
        assert!(sample_exists(&conn, &s.sample_name).unwrap());
        assert_eq!(count_projects(&conn, "HFX_20250310_AB").unwrap(), 1);

        let fetched_project = get_project(&conn, "HFX_20250310_AB").unwrap().unwrap();
        assert_eq!(fetched_project, project("HFX_20250310_AB"));
    }

    #[test]
    fn test_duplicate_inserts_are_distinguishable() {
        let conn = setup_db();
        insert_project(&conn, &project("HFX_20250310_AB")).unwrap();
        let err = insert_project(&conn, &project("HFX_20250310_AB")).unwrap_err();
        assert!(err.is_duplicate());

        let s = sample("HFX_20250310_AB_S01.raw", "HFX_20250310_AB", "2025-03-10 09:00:00.000");
        insert_sample(&conn, &s).unwrap();
        assert!(insert_sample(&conn, &s).unwrap_err().is_duplicate());
        assert!(insert_corrupt_sample(&conn, &s.sample_name, "HFX_20250310_AB", "CorruptFile")
            .unwrap_err()
            .is_duplicate());
    }

    #[test]
    fn test_corrupt_sample_has_only_tag() {
        let conn = setup_db();
        insert_corrupt_sample(&conn, "HFX_20250310_AB_S02.raw", "HFX_20250310_AB", "CorruptFile")
            .unwrap();
        let fetched = get_sample(&conn, "HFX_20250310_AB_S02.raw").unwrap().unwrap();
        assert_eq!(
            fetched,
            SampleRecord::corrupt("HFX_20250310_AB_S02.raw", "HFX_20250310_AB", "CorruptFile")
        );
    }

    #[test]
    fn test_update_sample_clears_error_tag() {
        let conn = setup_db();
        insert_corrupt_sample(&conn, "HFX_20250310_AB_S02.raw", "HFX_20250310_AB", "CorruptFile")
            .unwrap();

        let mut replacement =
            sample("HFX_20250310_AB_S02.raw", "HFX_20250310_AB", "2025-03-10 10:00:00.000");
        replacement.pump_pressure = None;
        assert_eq!(update_sample(&conn, &replacement).unwrap(), 1);

        let fetched = get_sample(&conn, "HFX_20250310_AB_S02.raw").unwrap().unwrap();
        assert_eq!(fetched, replacement);
        assert!(fetched.error_tag.is_none());

        let unknown = sample("nope_1_2.raw", "nope_1_2", "2025-03-10 10:00:00.000");
        assert_eq!(update_sample(&conn, &unknown).unwrap(), 0);
    }

    #[test]
    fn test_family_queries() {
        let conn = setup_db();
        insert_project(&conn, &project("HFX_20250320_AB")).unwrap();
        insert_project(&conn, &project("HFX_20250305_AB")).unwrap();
        insert_project(&conn, &project("HFX_20250410_AB")).unwrap();
        insert_project(&conn, &project("HFX_20250305_CD")).unwrap();

        let matches = find_family_projects(&conn, &family("HFX_20250312_AB.raw")).unwrap();
        let ids: Vec<&str> = matches.iter().map(|p| p.project_id.as_str()).collect();
        assert_eq!(ids, vec!["HFX_20250305_AB", "HFX_20250320_AB"]);

        insert_sample(
            &conn,
            &sample("HFX_20250305_AB_S1.raw", "HFX_20250305_AB", "2025-03-05 08:00:00.000"),
        )
        .unwrap();
        insert_sample(
            &conn,
            &sample("HFX_20250320_AB_S1.raw", "HFX_20250320_AB", "2025-03-21 08:00:00.000"),
        )
        .unwrap();
        insert_corrupt_sample(&conn, "HFX_20250320_AB_S2.raw", "HFX_20250320_AB", "CorruptFile")
            .unwrap();

        let latest = latest_family_sample(&conn, &family("HFX_20250312_AB.raw"))
            .unwrap()
            .unwrap();
        assert_eq!(latest.sample_name, "HFX_20250320_AB_S1.raw");

        assert!(latest_family_sample(&conn, &family("QE_20250312_ZZ.raw"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_missing_sample_names_is_idempotent_and_leaves_scratch_empty() {
        let conn = setup_db();
        insert_corrupt_sample(&conn, "b.raw", "x_1_y", "CorruptFile").unwrap();
        let names = vec!["a.raw".to_string(), "b.raw".to_string(), "c.raw".to_string()];

        let first = missing_sample_names(&conn, &names).unwrap();
        assert_eq!(scratch_row_count(&conn).unwrap(), 0);
        let second = missing_sample_names(&conn, &names).unwrap();
        assert_eq!(scratch_row_count(&conn).unwrap(), 0);

        assert_eq!(first, vec!["a.raw".to_string(), "c.raw".to_string()]);
        assert_eq!(first, second);
        assert_eq!(list_sample_keys_in(&conn, &names).unwrap(), vec!["b.raw".to_string()]);
    }

    #[test]
    fn test_project_months() {
        let conn = setup_db();
        insert_project(&conn, &project("HFX_20250310_AB")).unwrap();
        insert_project(&conn, &project("HFX_20250322_CD")).unwrap();
        insert_project(&conn, &project("HFX_20250102_AB")).unwrap();
        assert_eq!(
            project_months(&conn).unwrap(),
            vec!["202501".to_string(), "202503".to_string()]
        );
    }
}
