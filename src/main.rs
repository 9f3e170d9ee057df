mod error;
mod config;
mod series;
mod spline;
mod correlation;
mod weekly;
mod rt;
mod csse;
mod export;
mod graph;

use std::{env,fs};
use std::collections::BTreeMap;

use chrono::Local;
use chrono::naive::NaiveDate;
use log::{debug,info,warn,error};

use config::Config;
use error::{Result,Error};
use series::{Entity,EntityKey,DailySeries};
use correlation::CorrelationOptions;
use weekly::WeeklyOptions;
use rt::{RModel,RtOptions};


fn main() -> Result<()> {

    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    let mut model = RModel::load(&config.r_table, RtOptions {
	generation_interval: config.generation_interval,
	..Default::default()
    })?;
    info!("{} entities in {}", model.entities().count(), config.r_table.display());

    // `set <country>/<region> "[(day, R), ...]"` edits the breakpoint table
    let args : Vec<String> = env::args().skip(1).collect();
    if let [cmd, entity, breakpoints] = args.as_slice() {
	if cmd == "set" {
	    let key = match entity.split_once('/') {
		Some((country,region)) => EntityKey::new(csse::SOURCE, country, region),
		None => return Err(Error::MissingEntity(entity.clone())),
	    };
	    model.update(&key, breakpoints)?;
	    model.save(&config.r_table)?;
	    info!("Updated breakpoints for {}", key);
	}
    }

    fs::create_dir_all(&config.output_dir)?;
    let data = csse::entities(&csse::table(&config.cache_dir, csse::Kind::Confirmed)?,
			      &csse::table(&config.cache_dir, csse::Kind::Deaths)?)?;
    info!("Loaded {} CSSE entities", data.len());

    let today = Local::now().naive_local().date();
    for key in &config.entities {
	if let Err(err) = entity_report(&config, &data, &mut model, key, today) {
	    error!("{}: {}", key, err);
	}
    }

    Ok(())

}


fn entity_report(config: &Config, data: &BTreeMap<EntityKey,(DailySeries,DailySeries)>,
		 model: &mut RModel, key: &EntityKey, today: NaiveDate) -> Result<()> {

    let (cases,deaths) = data.get(key).ok_or_else(|| Error::MissingEntity(key.to_string()))?;
    let entity = Entity::new(key.clone(), cases.clone(), deaths.clone(),
			     &CorrelationOptions::default())?;

    match entity.death_rate.best_shift() {
	Some((shift,row)) => info!("{}: likely lag {} days, {:.0} cases per death ({} samples)",
				   key, shift, row.cases_per_death(), row.sample_count),
	None => warn!("{}: no lag estimate, estimates up to shift {}", key, entity.death_rate_len),
    }

    let options = WeeklyOptions {
	correct_weeks: config.correct_weeks,
	spline_smoothing: config.spline_smoothing,
	spline_degree: config.spline_degree,
    };
    match model.breakpoints(key) {
	Some(steps) => info!("{}: {} breakpoints, R = {} since day {}", key, steps.len(),
			     steps.last().map_or(1.0, |bp| bp.r), steps.last().map_or(0.0, |bp| bp.day)),
	None => warn!("{}: no breakpoints in {}", key, config.r_table.display()),
    }
    let curve = model.curve(key, entity.time_minmax);

    let origin = csse::origin()?;
    let corrected = export::deseasonalize_entity(&entity, origin, &options)?;
    if corrected.cases.is_empty() {
	warn!("{}: no positive case counts to correct", key);
    }
    info!("{}: weekly correction {:?}", key, corrected.cases.mode);
    if let Some(spline) = &corrected.cases.spline {
	debug!("{}: degree {} trend with {} knots, residual {:.3}",
	       key, spline.degree(), spline.knots().len(), spline.residual());
    }

    export::export_current_curve(&config.output_dir.join("csv"), &entity, origin, today,
				 &options, &curve)?;
    graph::entity_graph(&config.output_dir, origin, key,
			&graph::entity_traces(&entity, &corrected, &curve))?;
    graph::correlation_graph(&config.output_dir, key, &entity.death_rate)?;

    Ok(())

}
