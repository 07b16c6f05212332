//! Experiment descriptor and its file format.
//!
//! An experiment file is an xml document holding the run parameters, the
//! named experimental conditions, the output views and, once a run was
//! saved, the results of that run.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::util;
use crate::value::Value;
use crate::xml::{self, Element};

/// File extension used for experiment files.
pub const EXPERIMENT_FILE_EXTENSION: &str = "exp";

const EXPERIMENT_TAG: &str = "experiment";
const CONDITIONS_TAG: &str = "conditions";
const CONDITION_TAG: &str = "condition";
const PORT_TAG: &str = "port";
const VIEWS_TAG: &str = "views";
const VIEW_TAG: &str = "view";
const RESULTS_TAG: &str = "results";

/// Port name to value mapping of a single experimental condition.
pub type Condition = BTreeMap<String, Value>;

/// How the values of multiple conditions are combined into runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combination {
    Linear,
    Total,
}

impl Default for Combination {
    fn default() -> Self {
        Combination::Total
    }
}

impl Combination {
    pub fn to_str(&self) -> &'static str {
        match self {
            Combination::Linear => "linear",
            Combination::Total => "total",
        }
    }
}

impl FromStr for Combination {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(Combination::Linear),
            "total" => Ok(Combination::Total),
            _ => Err(Error::InvalidExperiment(format!(
                "unknown combination '{}', expected 'linear' or 'total'",
                s
            ))),
        }
    }
}

/// Output view declaration. The plugin is resolved by name through the
/// plugin loader when the experiment runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub name: String,
    pub plugin: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub name: String,
    pub duration: f64,
    pub seed: u32,
    pub date: String,
    pub combination: Combination,
    pub conditions: BTreeMap<String, Condition>,
    pub views: Vec<View>,
    /// State written back after a run when results are saved.
    pub results: Option<Value>,
}

impl Experiment {
    /// Creates a new experiment dated now, without conditions or views.
    pub fn new(name: &str, duration: f64) -> Result<Self> {
        let experiment = Experiment {
            name: name.to_string(),
            duration,
            seed: 0,
            date: current_date(),
            combination: Combination::default(),
            conditions: BTreeMap::new(),
            views: Vec::new(),
            results: None,
        };
        experiment.validate()?;
        Ok(experiment)
    }

    /// Reads an experiment file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = util::read_text_file(path)?;
        text.parse()
    }

    /// Overwrites the file at `path` with the xml form of the experiment.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        util::write_text_file(path, &self.to_xml())
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidExperiment(
                "experiment name is empty".to_string(),
            ));
        }
        if !(self.duration.is_finite() && self.duration > 0.) {
            return Err(Error::InvalidExperiment(format!(
                "duration must be positive, got {}",
                self.duration
            )));
        }
        Ok(())
    }

    /// Sets the value of a port inside a condition, creating the condition
    /// when needed.
    pub fn set_condition_port(&mut self, condition: &str, port: &str, value: Value) {
        self.conditions
            .entry(condition.to_string())
            .or_insert_with(BTreeMap::new)
            .insert(port.to_string(), value);
    }

    pub fn add_view(&mut self, name: &str, plugin: &str, location: &str) {
        self.views.push(View {
            name: name.to_string(),
            plugin: plugin.to_string(),
            location: location.to_string(),
        });
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "{}", xml::XML_DECLARATION)?;
        writeln!(
            out,
            "<{} name=\"{}\" duration=\"{}\" seed=\"{}\" date=\"{}\" combination=\"{}\">",
            EXPERIMENT_TAG,
            xml::escape(&self.name),
            self.duration,
            self.seed,
            xml::escape(&self.date),
            self.combination.to_str()
        )?;

        writeln!(out, "  <{}>", CONDITIONS_TAG)?;
        for (name, ports) in &self.conditions {
            writeln!(out, "    <{} name=\"{}\">", CONDITION_TAG, xml::escape(name))?;
            for (port, value) in ports {
                writeln!(
                    out,
                    "      <{0} name=\"{1}\">{2}</{0}>",
                    PORT_TAG,
                    xml::escape(port),
                    value.to_xml()
                )?;
            }
            writeln!(out, "    </{}>", CONDITION_TAG)?;
        }
        writeln!(out, "  </{}>", CONDITIONS_TAG)?;

        writeln!(out, "  <{}>", VIEWS_TAG)?;
        for view in &self.views {
            writeln!(
                out,
                "    <{} name=\"{}\" plugin=\"{}\" location=\"{}\" />",
                VIEW_TAG,
                xml::escape(&view.name),
                xml::escape(&view.plugin),
                xml::escape(&view.location)
            )?;
        }
        writeln!(out, "  </{}>", VIEWS_TAG)?;

        if let Some(results) = &self.results {
            writeln!(out, "  <{0}>{1}</{0}>", RESULTS_TAG, results.to_xml())?;
        }
        writeln!(out, "</{}>", EXPERIMENT_TAG)
    }

    fn from_element(root: &Element) -> Result<Self> {
        root.expect_name(EXPERIMENT_TAG)?;

        let duration = root
            .required_attr("duration")?
            .trim()
            .parse::<f64>()
            .map_err(|e| Error::InvalidExperiment(format!("invalid duration: {}", e)))?;
        let seed = match root.attr("seed") {
            Some(s) => s
                .trim()
                .parse::<u32>()
                .map_err(|e| Error::InvalidExperiment(format!("invalid seed: {}", e)))?,
            None => 0,
        };
        let date = match root.attr("date") {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => current_date(),
        };
        let combination = match root.attr("combination") {
            Some(c) => c.parse()?,
            None => Combination::default(),
        };

        let mut conditions = BTreeMap::new();
        if let Some(section) = root.child(CONDITIONS_TAG) {
            for condition in &section.children {
                condition.expect_name(CONDITION_TAG)?;
                let name = condition.required_attr("name")?;
                let mut ports = BTreeMap::new();
                for port in &condition.children {
                    port.expect_name(PORT_TAG)?;
                    let port_name = port.required_attr("name")?;
                    let value = single_value(port, port_name)?;
                    ports.insert(port_name.to_string(), value);
                }
                if conditions.insert(name.to_string(), ports).is_some() {
                    return Err(Error::InvalidExperiment(format!(
                        "condition '{}' is defined more than once",
                        name
                    )));
                }
            }
        }

        let mut views = Vec::new();
        if let Some(section) = root.child(VIEWS_TAG) {
            for view in &section.children {
                view.expect_name(VIEW_TAG)?;
                views.push(View {
                    name: view.required_attr("name")?.to_string(),
                    plugin: view.required_attr("plugin")?.to_string(),
                    location: view.attr("location").unwrap_or_default().to_string(),
                });
            }
        }

        let results = match root.child(RESULTS_TAG) {
            Some(section) => Some(single_value(section, RESULTS_TAG)?),
            None => None,
        };

        let experiment = Experiment {
            name: root.required_attr("name")?.to_string(),
            duration,
            seed,
            date,
            combination,
            conditions,
            views,
            results,
        };
        experiment.validate()?;
        Ok(experiment)
    }
}

impl FromStr for Experiment {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Experiment::from_element(&Element::parse(s)?)
    }
}

fn single_value(element: &Element, owner: &str) -> Result<Value> {
    match element.children.as_slice() {
        [value] => Value::from_element(value),
        _ => Err(Error::InvalidExperiment(format!(
            "'{}' must hold exactly one value, found {}",
            owner,
            element.children.len()
        ))),
    }
}

fn current_date() -> String {
    chrono::Local::now().to_rfc2822()
}
