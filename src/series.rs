use std::fmt;
use std::str::FromStr;

use chrono::{Datelike,Duration};
use chrono::naive::NaiveDate;
use serde::{Serialize,Deserialize};

use super::error::{Result,Error};
use super::correlation::{self,CorrelationOptions,CorrelationResult};


/// Per-day counts, index 0 is the calendar origin.
pub type DailySeries = Vec<f64>;


/// (source, region level 1, region level 2)
#[derive(Serialize,Deserialize,Clone,Debug,PartialEq,Eq,PartialOrd,Ord,Hash)]
pub struct EntityKey {
    pub source: String,
    pub level1: String,
    pub level2: String,
}

impl EntityKey {

    pub fn new(source: &str, level1: &str, level2: &str) -> Self {
	Self {
	    source: source.to_string(),
	    level1: level1.to_string(),
	    level2: level2.to_string()
	}
    }

}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	write!(f, "({:?}, {:?}, {:?})", self.source, self.level1, self.level2)
    }
}

/// Parses the `Display` form; single quotes are accepted as well.
impl FromStr for EntityKey {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
	let invalid = || Error::MissingEntity(s.to_string());
	let inner = s.trim().strip_prefix('(').and_then(|s| s.strip_suffix(')'))
	    .ok_or_else(invalid)?;
	let mut parts = Vec::new();
	let mut chars = inner.chars().peekable();
	loop {
	    while chars.peek().map_or(false, |c| c.is_whitespace()) {
		chars.next();
	    }
	    let quote = match chars.next() {
		Some(q @ '"') | Some(q @ '\'') => q,
		_ => return Err(invalid()),
	    };
	    let mut part = String::new();
	    loop {
		match chars.next() {
		    Some('\\') => part.extend(chars.next()),
		    Some(c) if c == quote => break,
		    Some(c) => part.push(c),
		    None => return Err(invalid()),
		}
	    }
	    parts.push(part);
	    while chars.peek().map_or(false, |c| c.is_whitespace()) {
		chars.next();
	    }
	    match chars.next() {
		Some(',') => continue,
		None => break,
		Some(_) => return Err(invalid()),
	    }
	}
	match parts.as_slice() {
	    [source, level1, level2] => Ok(Self::new(source, level1, level2)),
	    _ => Err(invalid()),
	}
    }
}


/// One tracked population unit together with its cached correlation.
#[derive(Clone,Debug)]
pub struct Entity {
    pub key: EntityKey,
    pub cases: DailySeries,
    pub deaths: DailySeries,
    pub time_minmax: (usize,usize),
    pub death_rate: CorrelationResult,
    pub death_rate_len: usize,
}

impl Entity {

    pub fn new(key: EntityKey, cases: DailySeries, deaths: DailySeries,
	       options: &CorrelationOptions) -> Result<Self> {
	if cases.len() != deaths.len() {
	    return Err(Error::LengthMismatch {
		what: "cases/deaths", left: cases.len(), right: deaths.len()
	    });
	}
	if cases.is_empty() {
	    return Err(Error::MissingData);
	}
	let time_minmax = (0, cases.len() - 1);
	let mut entity = Self {
	    key, cases, deaths, time_minmax,
	    death_rate: CorrelationResult::default(),
	    death_rate_len: 0,
	};
	entity.refresh_correlation(options)?;
	Ok(entity)
    }

    /// Recompute the cached correlation after the series changed.
    pub fn refresh_correlation(&mut self, options: &CorrelationOptions) -> Result<()> {
	self.death_rate = correlation::estimate(&self.cases, &self.deaths, options)?;
	self.death_rate_len = self.death_rate.estimated_len();
	Ok(())
    }

    pub fn time_axis(&self) -> Vec<f64> {
	(self.time_minmax.0..=self.time_minmax.1).map(|d| d as f64).collect()
    }

}


#[derive(Clone,Debug)]
pub struct NaiveDateRange(pub NaiveDate,pub Option<NaiveDate>);

impl Iterator for NaiveDateRange {
    type Item = NaiveDate;
    fn next(&mut self) -> Option<NaiveDate> {
	match self.1.map_or(true, |end| self.0 <= end) {
	    false => None,
	    true => {
		let current = self.0;
		self.0 = self.0.succ_opt()?;
		Some(current)
	    }
	}
    }
}


pub fn date_of(origin: NaiveDate, day: usize) -> NaiveDate {
    origin + Duration::days(day as i64)
}

/// Weekday labels (Monday = 0) for consecutive day offsets.
pub fn weekdays(origin: NaiveDate, days: usize) -> Vec<Option<u8>> {
    NaiveDateRange(origin, None).take(days)
	.map(|date| Some(date.weekday().num_days_from_monday() as u8))
	.collect()
}


/// Daily increments of a cumulative series, first day 0.
pub fn daily(cumulative: &[f64]) -> DailySeries {
    (0..cumulative.len()).map(
	|i| if i == 0 { 0.0 } else { cumulative[i] - cumulative[i-1] }
    ).collect()
}

/// Negative reporting corrections are not counts.
pub fn clamp_counts(series: &[f64]) -> DailySeries {
    series.iter().map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 }).collect()
}

/// Place reported (day, value) pairs on a gap-free axis starting at the
/// origin, filling days without a report with 0. Negative days are dropped.
pub fn fill_gaps(reports: &[(i64,f64)], min_len: usize) -> DailySeries {
    let len = reports.iter().filter(|(d,_)| *d >= 0)
	.map(|(d,_)| *d as usize + 1).max().unwrap_or(0).max(min_len);
    let mut series = vec![0.0; len];
    for (day,value) in reports.iter().filter(|(d,_)| *d >= 0) {
	series[*day as usize] += value;
    }
    series
}

pub fn sum_series(data: &[&DailySeries]) -> DailySeries {
    let len = data.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut result = vec![0.0; len];
    for series in data {
	for (sum,val) in result.iter_mut().zip(series.iter()) {
	    *sum += val;
	}
    }
    result
}
