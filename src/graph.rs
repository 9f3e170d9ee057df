use std::{io,fs};
use std::fs::File;
use std::io::Write;
use std::path::{Path,PathBuf};

use chrono::Duration;
use chrono::naive::NaiveDate;
use serde_json::{Value,json};
use unidecode::unidecode;

use super::error::{Result,Error};
use super::series::{Entity,EntityKey};
use super::correlation::CorrelationResult;
use super::export::Corrected;
use super::weekly::DeseasonalizationResult;
use super::rt::RCurveResult;


/// One named line; `shift` moves it along the time axis (in days) and
/// `scale` multiplies its values.
#[derive(Clone,Debug)]
pub struct Trace {
    pub name: String,
    pub values: Vec<(f64,f64)>,
    pub shift: f64,
    pub scale: f64,
}

impl Trace {
    pub fn new(name: &str, values: Vec<(f64,f64)>) -> Self {
	Self { name: name.to_string(), values, shift: 0.0, scale: 1.0 }
    }

    pub fn shifted(self, shift: f64, scale: f64) -> Self {
	Self { shift, scale, ..self }
    }

    fn points(&self) -> impl Iterator<Item = (f64,f64)> + '_ {
	self.values.iter()
	    .map(move |(t,v)| (t + self.shift, v * self.scale))
	    .filter(|(_,v)| v.is_finite() && *v > 0.0)
    }
}


/// Raw and corrected series of an entity, its deaths moved back by the
/// most likely lag, and the R model scaled onto the corrected cases.
pub fn entity_traces(entity: &Entity, corrected: &Corrected, curve: &RCurveResult) -> Vec<Trace> {

    let raw = |series: &[f64]| -> Vec<(f64,f64)> {
	entity.time_axis().into_iter().zip(series.iter().cloned()).collect()
    };
    let corr = |result: &DeseasonalizationResult| -> Vec<(f64,f64)> {
	result.time_axis.iter().cloned().zip(result.corrected()).collect()
    };

    let mut traces = vec![
	Trace::new("cases", raw(&entity.cases)),
	Trace::new("cases (corrected)", corr(&corrected.cases)),
	Trace::new("deaths", raw(&entity.deaths)),
	Trace::new("deaths (corrected)", corr(&corrected.deaths)),
    ];

    if let Some((shift,row)) = entity.death_rate.best_shift() {
	let factor = row.cases_per_death();
	traces.push(Trace::new(&format!("deaths (-{} days, x{:.0})", shift, factor),
			       corr(&corrected.deaths))
		    .shifted(-(shift as f64), factor));
    }

    if let (Some(t0),Some(first)) = (corrected.cases.time_axis.first(), corrected.cases.corrected().first()) {
	let at_t0 = curve.time_axis.iter().zip(&curve.infections)
	    .find(|(t,_)| **t >= *t0)
	    .map_or(1.0, |(_,i)| *i);
	let name = match curve.valid {
	    true => "R model",
	    false => "R model (no breakpoints)",
	};
	traces.push(Trace::new(name, curve.time_axis.iter().cloned().zip(curve.infections.iter().cloned()).collect())
		    .shifted(0.0, first / at_t0));
    }

    traces

}


pub fn entity_graph(graph_path: &Path, origin: NaiveDate, key: &EntityKey,
		    traces: &[Trace]) -> Result<PathBuf> {

    let title = format!("Daily COVID-19 cases and deaths in {} ({})", key.level2, key.level1);
    let path = graph_path.join(file_name(&key.source))
	.join(format!("{}.html", file_name(&format!("{}_{}", key.level1, key.level2))));

    let values = traces.iter().flat_map(
	|trace| trace.points().map(move |(t,val)| -> Result<Value> {
	    let date = timestamp(origin, t)?;
	    Ok(json!({
		"Date": date,
		"Trace": trace.name,
		"Value": val
	    }))
	})
    ).collect::<Result<Vec<_>>>()?;

    write_page(&path, &title, &json!({
	"$schema": "https://vega.github.io/schema/vega-lite/v4.json",
	"height": "container",
	"width": "container",
	"title": title,
	"data": {
	    "values": values
	},
	"encoding": {
	    "color": {
		"field": "Trace",
		"type": "nominal"
	    },
	    "x": {
		"field": "Date",
		"title": "Date",
		"type": "temporal"
	    },
	    "y": {
		"field": "Value",
		"title": "Count",
		"scale": {"type": "log"},
		"type": "quantitative"
	    }
	},
	"layer": [
	    {
		"mark": "line",
		"selection": {
		    "Highlight": {"bind":"legend","type":"multi","fields":["Trace"]},
		    "Grid": {"bind":"scales","type":"interval"}
		},
		"encoding": {
		    "opacity": {"value":0.1,"condition":{"value":1,"selection":"Highlight"}}
		}
	    },
	    {
		"mark": {"type": "point", "tooltip": {"content": "data"}},
		"encoding": {
		    "opacity": {"value": 0}
		}
	    }
	]
    }))?;

    Ok(path)

}


/// Ratio estimate and dispersion per shift; shifts without an estimate
/// are left out.
pub fn correlation_graph(graph_path: &Path, key: &EntityKey,
			 result: &CorrelationResult) -> Result<PathBuf> {

    let title = format!("Deaths per case by reporting lag in {} ({})", key.level2, key.level1);
    let path = graph_path.join(file_name(&key.source))
	.join(format!("{}-lag.html", file_name(&format!("{}_{}", key.level1, key.level2))));

    let (ratios,stds) = (result.ratios(), result.stds());
    write_page(&path, &title, &json!({
	"$schema": "https://vega.github.io/schema/vega-lite/v4.json",
	"height": "container",
	"width": "container",
	"title": title,
	"data": {
	    "values": result.rows.iter().enumerate()
		.filter(|(_,row)| row.is_estimated())
		.map(|(shift,row)| json!({
		    "Shift": shift,
		    "Ratio": ratios[shift],
		    "Std": stds[shift],
		    "Samples": row.sample_count
		})).collect::<Vec<_>>()
	},
	"encoding": {
	    "x": {
		"field": "Shift",
		"title": "Lag (days)",
		"type": "quantitative"
	    }
	},
	"resolve": {
	    "scale": {
		"y": "independent"
	    }
	},
	"layer": [
	    {
		"mark": {"color": "red", "type": "line", "tooltip": {"content": "data"}},
		"selection": {
		    "Grid1": {"bind":"scales","type":"interval"}
		},
		"encoding": {
		    "y": {
			"field": "Ratio",
			"type": "quantitative",
			"axis": {"titleColor": "red", "title": "Deaths per case"}
		    }
		}
	    },
	    {
		"mark": {"color": "blue", "type": "line"},
		"encoding": {
		    "y": {
			"field": "Std",
			"type": "quantitative",
			"axis": {"titleColor": "blue", "title": "Standard deviation (log)"}
		    }
		}
	    }
	]
    }))?;

    Ok(path)

}


fn file_name(name: &str) -> String {
    unidecode(name).replace(|c: char| c == '/' || c == '\\', "-")
}

/// Day offsets may be fractional for the model curve.
fn timestamp(origin: NaiveDate, day: f64) -> Result<String> {
    let midnight = origin.and_hms_opt(0, 0, 0)
	.ok_or_else(|| Error::InvalidDate(origin.to_string()))?;
    let datetime = midnight + Duration::minutes((day * 1440.0).round() as i64);
    Ok(format!("{}", datetime.format("%Y-%m-%dT%H:%M")))
}

fn write_page(path: &Path, title: &str, spec: &Value) -> Result<()> {

    if let Some(dir) = path.parent() {
	fs::create_dir_all(dir)?;
    }
    let mut out = io::BufWriter::new(File::create(path)?);

    write!(out, "<!DOCTYPE html><html><head>")?;
    write!(out, "<meta charset=\"UTF-8\">")?;
    write!(out, "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">")?;
    write!(out, "<title>{}</title>", title)?;
    write!(out, "<script src=\"https://cdn.jsdelivr.net/npm/vega@5\"></script>")?;
    write!(out, "<script src=\"https://cdn.jsdelivr.net/npm/vega-lite@4\"></script>")?;
    write!(out, "<script src=\"https://cdn.jsdelivr.net/npm/vega-embed\"></script>")?;
    write!(out, "</head>")?;
    write!(out, "<body>")?;
    write!(out, "<div id=\"vis\" style=\"overflow: hidden; position: absolute;top: 0; left: 0; right: 0; bottom: 0;\"></div>")?;
    write!(out, "<script type=\"text/javascript\">")?;
    write!(out, "var spec = ")?;
    serde_json::to_writer_pretty(out.by_ref(), spec)?;
    write!(out, ";vegaEmbed('#vis', spec,{{}}).then(function(result) {{")?;
    write!(out, "}}).catch(console.error);")?;
    write!(out, "</script>")?;
    write!(out, "</body></html>")?;
    out.flush()?;

    Ok(())

}
