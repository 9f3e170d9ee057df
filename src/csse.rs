use std::{fs,io};
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use std::collections::{BTreeMap,HashMap};

use chrono::naive::NaiveDate;
use log::{info,warn};
use serde::{Serialize,Deserialize};

use super::error::{Result,Error};
use super::series::{self,EntityKey,DailySeries};


pub const SOURCE : &str = "JHU_GL";

const BASE_URL : &str = "https://raw.githubusercontent.com/CSSEGISandData/COVID-19\
			 /master/csse_covid_19_data/csse_covid_19_time_series";

/// Day 0 of every CSSE series.
pub fn origin() -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(2020, 1, 22)
	.ok_or_else(|| Error::InvalidDate("2020-01-22".to_string()))
}


#[derive(Clone,Copy,Debug)]
pub enum Kind {
    Confirmed,
    Deaths,
}

impl Kind {
    fn name(&self) -> &'static str {
	match self {
	    Kind::Confirmed => "confirmed",
	    Kind::Deaths => "deaths",
	}
    }
}

/// Cumulative counts as published, one row per reporting region.
#[derive(Serialize,Deserialize,Clone,Debug,Default)]
pub struct Table {
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<Row>,
}

#[derive(Serialize,Deserialize,Clone,Debug)]
pub struct Row {
    pub province: String,
    pub country: String,
    pub cumulative: Vec<f64>,
}


/// Cumulative table of `kind`, from the cache if it is less than half an
/// hour old.
pub fn table(cache_path: &Path, kind: Kind) -> Result<Table> {

    let cache_path = cache_path.join("csse");
    let cache_file = cache_path.join(format!("{}.json", kind.name()));

    if cache_file.exists() && fs::metadata(&cache_file)?.modified()?.elapsed()? < Duration::new(1800,0) {
	match serde_json::from_reader::<_,Table>(io::BufReader::new(File::open(&cache_file)?)) {
	    Ok(cached) => return Ok(cached),
	    Err(err) => warn!("Ignoring unreadable cache {}: {}", cache_file.display(), err),
	}
    }

    let data = parse_table(&download(kind)?)?;
    fs::create_dir_all(&cache_path)?;
    serde_json::to_writer(io::BufWriter::new(File::create(cache_file)?), &data)?;
    Ok(data)

}

fn download(kind: Kind) -> Result<String> {
    let file = format!("time_series_covid19_{}_global.csv", kind.name());
    info!("Downloading {}...", file);
    let res = reqwest::blocking::get(&format!("{}/{}", BASE_URL, file))?;
    match res.status().is_success() {
	true => Ok(res.text()?),
	false => Err(Error::HttpError(res.status())),
    }
}

/// Parse a CSSE time series CSV: province, country, lat, long, then one
/// column per date.
pub fn parse_table(text: &str) -> Result<Table> {

    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let dates = reader.headers()?.iter().skip(4)
	.map(|d| NaiveDate::parse_from_str(d.trim(), "%m/%d/%y"))
	.collect::<std::result::Result<Vec<_>,_>>()?;

    let rows = reader.into_records().map(|c| {
	let c = c?;
	Ok(Row {
	    province: c.get(0).unwrap_or("").to_string(),
	    country: c.get(1).unwrap_or("").to_string(),
	    cumulative: c.iter().skip(4).map(|v| match v.trim() {
		"" => Ok(0.0),
		v => v.parse::<f64>(),
	    }).collect::<std::result::Result<_,_>>()?,
	})
    }).collect::<Result<Vec<_>>>()?;

    Ok(Table { dates, rows })

}


/// Daily cases and deaths per entity. Rows without a province are keyed
/// by their country; countries reported by province also get a total.
pub fn entities(confirmed: &Table, deaths: &Table)
		-> Result<BTreeMap<EntityKey,(DailySeries,DailySeries)>> {

    if confirmed.dates.len() != deaths.dates.len() {
	return Err(Error::LengthMismatch {
	    what: "confirmed/deaths dates",
	    left: confirmed.dates.len(), right: deaths.dates.len()
	});
    }

    let origin = origin()?;
    let days : Vec<i64> = confirmed.dates.iter()
	.map(|date| (*date - origin).num_days())
	.collect();
    let to_daily = |cumulative: &[f64]| series::clamp_counts(&series::fill_gaps(
	&days.iter().cloned().zip(series::daily(cumulative)).collect::<Vec<_>>(), 0));

    let death_rows : HashMap<(&str,&str),&Row> = deaths.rows.iter()
	.map(|row| ((row.country.as_str(), row.province.as_str()), row))
	.collect();

    let mut result = BTreeMap::new();
    let mut provinces : BTreeMap<&str,(Vec<&DailySeries>,Vec<&DailySeries>)> = BTreeMap::new();

    for row in &confirmed.rows {

	let death_row = match death_rows.get(&(row.country.as_str(), row.province.as_str())) {
	    Some(death_row) => death_row,
	    None => {
		warn!("No deaths reported for {}/{}, skipping", row.country, row.province);
		continue;
	    }
	};

	if !row.province.is_empty() {
	    let (cases,deaths) = provinces.entry(row.country.as_str()).or_default();
	    cases.push(&row.cumulative);
	    deaths.push(&death_row.cumulative);
	}

	let region = match row.province.as_str() {
	    "" => row.country.as_str(),
	    province => province,
	};
	result.insert(EntityKey::new(SOURCE, &row.country, region),
		      (to_daily(&row.cumulative), to_daily(&death_row.cumulative)));

    }

    for (country,(cases,deaths)) in provinces {
	result.insert(EntityKey::new(SOURCE, country, &format!("!_{}_total", country)),
		      (to_daily(&series::sum_series(&cases)), to_daily(&series::sum_series(&deaths))));
    }

    Ok(result)

}
