use std::fs;
use std::path::{Path,PathBuf};

use chrono::naive::NaiveDate;
use log::info;
use unidecode::unidecode;

use super::error::Result;
use super::series::{self,Entity};
use super::weekly::{self,WeeklyOptions,DeseasonalizationResult};
use super::rt::RCurveResult;


/// Both series of an entity with the weekly pattern removed.
pub struct Corrected {
    pub cases: DeseasonalizationResult,
    pub deaths: DeseasonalizationResult,
}

pub fn deseasonalize_entity(entity: &Entity, origin: NaiveDate,
			    options: &WeeklyOptions) -> Result<Corrected> {
    let time_axis = entity.time_axis();
    let labels = series::weekdays(series::date_of(origin, entity.time_minmax.0), time_axis.len());
    Ok(Corrected {
	cases: weekly::deseasonalize(&time_axis, &entity.cases, &labels, options)?,
	deaths: weekly::deseasonalize(&time_axis, &entity.deaths, &labels, options)?,
    })
}

/// File name for an export made on `today`.
pub fn export_file_name(entity: &Entity, options: &WeeklyOptions, today: NaiveDate) -> String {
    let key = &entity.key;
    unidecode(&format!("{}_{}_{}_{}_s_{:?}_k_{}_range_{}_.csv",
		       today.format("%y%m%d"), key.source, key.level1, key.level2,
		       options.spline_smoothing, options.spline_degree, options.correct_weeks))
	.replace('/', "-")
}

/// Write raw, corrected and modelled counts per day as a `;`-separated
/// table. Returns the path written.
pub fn export_current_curve(dir: &Path, entity: &Entity, origin: NaiveDate, today: NaiveDate,
			    options: &WeeklyOptions, curve: &RCurveResult) -> Result<PathBuf> {

    let corrected = deseasonalize_entity(entity, origin, options)?;
    let len = entity.cases.len();
    let cases_corr = corrected.cases.padded_corrected(len);
    let deaths_corr = corrected.deaths.padded_corrected(len);

    fs::create_dir_all(dir)?;
    let path = dir.join(export_file_name(entity, options, today));
    let mut out = csv::WriterBuilder::new()
	.delimiter(b';')
	.has_headers(false)
	.from_path(&path)?;

    for i in 1..len {
	let day = entity.time_minmax.0 + i;
	let modelled = curve.infections.get(10 * (i - 1)).cloned().unwrap_or(0.0);
	out.write_record(&[
	    day.to_string(),
	    series::date_of(origin, day).format("%d.%m.%Y").to_string(),
	    entity.cases[i].to_string(),
	    entity.deaths[i].to_string(),
	    (cases_corr[i] as i64).to_string(),
	    (deaths_corr[i] as i64).to_string(),
	    (modelled as i64).to_string(),
	])?;
    }
    out.flush()?;

    info!("Exported {}", path.display());
    Ok(path)

}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::series::EntityKey;
    use crate::correlation::CorrelationOptions;
    use crate::rt::{self,Breakpoint,RtOptions};

    fn entity() -> Entity {
	let cases = (0..80).map(|i| (200.0 + 5.0 * i as f64) * if i % 7 == 3 { 0.6 } else { 1.0 }).collect();
	let deaths = (0..80).map(|i| 2.0 + 0.1 * i as f64).collect();
	Entity::new(EntityKey::new("JHU_GL", "Côte d'Ivoire", "Côte d'Ivoire"),
		    cases, deaths, &CorrelationOptions::default()).unwrap()
    }

    #[test]
    fn writes_one_row_per_day_after_the_first() {
	let dir = tempfile::tempdir().unwrap();
	let entity = entity();
	let origin = NaiveDate::from_ymd_opt(2020, 1, 22).unwrap();
	let today = NaiveDate::from_ymd_opt(2021, 3, 5).unwrap();
	let options = WeeklyOptions::default();
	let curve = rt::compute_curve(&[Breakpoint { day: 0.0, r: 1.0 }], 84.0, &RtOptions::default());

	let path = export_current_curve(dir.path(), &entity, origin, today, &options, &curve).unwrap();
	assert_eq!(path.file_name().unwrap().to_str().unwrap(),
		   "210305_JHU_GL_Cote d'Ivoire_Cote d'Ivoire_s_1.0_k_5_range_6_.csv");

	let contents = fs::read_to_string(&path).unwrap();
	let lines : Vec<_> = contents.lines().collect();
	assert_eq!(lines.len(), 79);
	let first : Vec<_> = lines[0].split(';').collect();
	assert_eq!(first[0], "1");
	assert_eq!(first[1], "23.01.2020");
	assert_eq!(first[2], "205");
	assert_eq!(first[6], "1");
	let corrected : i64 = first[4].parse().unwrap();
	assert!(corrected > 150 && corrected < 260);
    }

}
