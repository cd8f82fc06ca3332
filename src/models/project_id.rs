use std::fmt;
use std::path::Path;

use chrono::{Datelike, NaiveDate};

use crate::error::AppError;

/// Project identifier `<Instrument>_<DateCode><Suffix>_<Initials>`, taken from the
/// first three underscore-delimited tokens of a sample name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectId {
    raw: String,
    instrument: String,
    date_digits: String,
    date_suffix: String,
    initials: String,
}

impl ProjectId {
    pub fn from_sample_name(name: &str) -> Result<Self, AppError> {
        let base = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| name.to_string());
        let stem = match base.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.contains('_') => stem.to_string(),
            _ => base.clone(),
        };

        let mut tokens = stem.split('_');
        let (Some(instrument), Some(date), Some(initials)) =
            (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(AppError::InvalidSampleName(name.to_string()));
        };
        if instrument.is_empty() || date.is_empty() || initials.is_empty() {
            return Err(AppError::InvalidSampleName(name.to_string()));
        }

        let split = date
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(date.len());
        let (date_digits, date_suffix) = date.split_at(split);

        Ok(Self {
            raw: format!("{instrument}_{date}_{initials}"),
            instrument: instrument.to_string(),
            date_digits: date_digits.to_string(),
            date_suffix: date_suffix.to_string(),
            initials: initials.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The full date token including any suffix, as stored in the project date column.
    pub fn date_token(&self) -> String {
        format!("{}{}", self.date_digits, self.date_suffix)
    }

    pub fn date_value(&self) -> Option<i64> {
        self.date_digits.parse().ok()
    }

    pub fn family(&self) -> ProjectFamily {
        ProjectFamily { id: self.clone() }
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Project ids that differ from a reference id only in the last two digits of the
/// date code.
#[derive(Debug, Clone)]
pub struct ProjectFamily {
    id: ProjectId,
}

impl ProjectFamily {
    fn wildcard_split(&self) -> Option<usize> {
        let digits = &self.id.date_digits;
        (digits.len() >= 2).then(|| digits.len() - 2)
    }

    /// SQL `LIKE` pattern for this family, to be used with `ESCAPE '\'`.
    pub fn like_pattern(&self) -> String {
        let id = &self.id;
        let date = match self.wildcard_split() {
            Some(at) => format!(
                "{}__{}",
                escape_like(&id.date_digits[..at]),
                escape_like(&id.date_suffix)
            ),
            None => escape_like(&id.date_token()),
        };
        format!(
            "{}\\_{}\\_{}",
            escape_like(&id.instrument),
            date,
            escape_like(&id.initials)
        )
    }

    /// Mirrors `like_pattern` (ASCII case-insensitive, as SQLite's `LIKE`).
    pub fn contains(&self, other: &ProjectId) -> bool {
        let id = &self.id;
        if !id.instrument.eq_ignore_ascii_case(&other.instrument)
            || !id.initials.eq_ignore_ascii_case(&other.initials)
            || !id.date_suffix.eq_ignore_ascii_case(&other.date_suffix)
            || id.date_digits.len() != other.date_digits.len()
        {
            return false;
        }
        match self.wildcard_split() {
            Some(at) => id.date_digits[..at] == other.date_digits[..at],
            None => id.date_digits == other.date_digits,
        }
    }

    pub fn contains_name(&self, name: &str) -> bool {
        ProjectId::from_sample_name(name)
            .map(|other| self.contains(&other))
            .unwrap_or(false)
    }
}

impl fmt::Display for ProjectFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = &self.id;
        match self.wildcard_split() {
            Some(at) => write!(
                f,
                "{}_{}??{}_{}",
                id.instrument,
                &id.date_digits[..at],
                id.date_suffix,
                id.initials
            ),
            None => f.write_str(id.as_str()),
        }
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Absolute distance between two numeric date codes.
pub fn date_code_distance(a: &ProjectId, b: &ProjectId) -> Option<i64> {
    Some((a.date_value()? - b.date_value()?).abs())
}

pub fn today_code(today: NaiveDate) -> i64 {
    i64::from(today.year()) * 10_000 + i64::from(today.month()) * 100 + i64::from(today.day())
}

/// Staging age as the plain difference of `YYYYMMDD` integers. Across a month or year
/// boundary this overstates the age (20250401 - 20250330 = 71).
pub fn staged_age(id: &ProjectId, today: NaiveDate) -> Option<i64> {
    Some(today_code(today) - id.date_value()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(name: &str) -> ProjectId {
        ProjectId::from_sample_name(name).unwrap()
    }

    #[test]
    fn derives_first_three_tokens() {
        let id = pid("HFX_20250312_AB_HSstd_01.raw");
        assert_eq!(id.as_str(), "HFX_20250312_AB");
        assert_eq!(id.date_token(), "20250312");
        assert_eq!(id.date_value(), Some(20250312));
    }

    #[test]
    fn derivation_is_deterministic() {
        let name = "/backup/202503/Astral_20250301_XY_sample7.raw";
        assert_eq!(pid(name), pid(name));
        assert_eq!(pid(name).as_str(), "Astral_20250301_XY");
    }

    #[test]
    fn strips_extension_when_only_three_tokens() {
        assert_eq!(pid("HFX_20250310_AB.raw").as_str(), "HFX_20250310_AB");
    }

    #[test]
    fn staging_unit_names_resolve_to_their_project() {
        let id = pid("HFX_20250312_AB__HFX_20250312_AB_HSstd_02.raw");
        assert_eq!(id.as_str(), "HFX_20250312_AB");
    }

    #[test]
    fn rejects_names_with_fewer_than_three_tokens() {
        assert!(matches!(
            ProjectId::from_sample_name("HFX_20250312.raw"),
            Err(AppError::InvalidSampleName(_))
        ));
        assert!(ProjectId::from_sample_name("HFX__AB.raw").is_err());
    }

    #[test]
    fn family_wildcards_last_two_date_digits() {
        let family = pid("HFX_20250312_AB.raw").family();
        assert!(family.contains(&pid("HFX_20250310_AB.raw")));
        assert!(family.contains(&pid("HFX_20250399_AB_x.raw")));
        assert!(!family.contains(&pid("HFX_20250412_AB.raw")));
        assert!(!family.contains(&pid("HFX_20250312_CD.raw")));
        assert!(!family.contains(&pid("Astral_20250312_AB.raw")));
        assert_eq!(family.to_string(), "HFX_202503??_AB");
    }

    #[test]
    fn family_keeps_date_suffix_literal() {
        let family = pid("HFX_20250312b_AB.raw").family();
        assert!(family.contains(&pid("HFX_20250301b_AB.raw")));
        assert!(!family.contains(&pid("HFX_20250301_AB.raw")));
    }

    #[test]
    fn like_pattern_escapes_separators() {
        let family = pid("HFX_20250312_AB.raw").family();
        assert_eq!(family.like_pattern(), "HFX\\_202503__\\_AB");
    }

    #[test]
    fn like_pattern_matches_in_sqlite() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let pattern = pid("HFX_20250312_AB.raw").family().like_pattern();
        let hit = |candidate: &str| -> bool {
            conn.query_row(
                "SELECT ?1 LIKE ?2 ESCAPE '\\'",
                rusqlite::params![candidate, pattern],
                |row| row.get(0),
            )
            .unwrap()
        };
        assert!(hit("HFX_20250301_AB"));
        assert!(!hit("HFX_20250401_AB"));
        assert!(!hit("HFXx202503011AB"));
    }

    #[test]
    fn date_distance_is_absolute() {
        let a = pid("HFX_20250312_AB.raw");
        let b = pid("HFX_20250310_AB.raw");
        assert_eq!(date_code_distance(&a, &b), Some(2));
        assert_eq!(date_code_distance(&b, &a), Some(2));
    }

    #[test]
    fn staged_age_uses_plain_subtraction() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 20).unwrap();
        assert_eq!(staged_age(&pid("HFX_20250312_AB.raw"), today), Some(8));

        let across_month = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        assert_eq!(staged_age(&pid("HFX_20250330_AB.raw"), across_month), Some(71));
    }
}
