//! Inversion task documents.
//!
//! A document is a sequence of sections: a title on its own line followed by
//! `key: value1, value2` lines. Lines starting with `//`, `#`, `%` or `;` are comments.
//!
//! ```text
//! geometry
//!  vertices: 8
//!  prisms: 3
//!  z0: 100.0
//!  magnetization: 3.0, -17.0, -19.0   // intensity (A/m), inclination, declination
//! field
//!  inc: -17.0
//!  dec: -19.0
//! steps
//!  dr: 1.0
//!  dx: 1.0
//!  dy: 1.0
//!  dz: 1.0
//! solver
//!  maxit: 20
//!  maxsteps: 10
//!  lambda: 1.0
//!  dlambda: 10.0
//!  tol: 1e-4
//!  loss: 2
//!  normalize: true
//!  max_seconds: 600
//!  loglevel: info
//! bounds
//!  radius: 10.0, 2000.0
//!  x0: -1000.0, 1000.0
//!  y0: -1000.0, 1000.0
//!  dz: 10.0, 1000.0
//! regularization
//!  alpha: 1e-4, 1e-4, 0.0, 0.0, 1e-4, 1e-7, 1e-7
//! outcrop
//!  target: 500, 500, 500, 500, 500, 500, 500, 500, 0, 0
//! initial
//!  x0: 0.0
//!  y0: 0.0
//!  dz: 300.0
//!  radius: 500.0
//! data
//!  file: survey.csv
//! ```
use crate::geophysics::model_utils::initial_cylinder;
use crate::geophysics::polyprism::{MainField, ang2vec};
use crate::numerical::optimization::LM_polyprism::{
    Bounds, FiniteDifferenceSteps, InversionError, InversionProblem, IterationControls, LossNorm,
    ModelSetup, PrismLayout, RegularizationWeights,
};
use crate::numerical::optimization::regularization::N_TERMS;
use crate::Utils::logger::read_survey_csv;
use nalgebra::{DVector, Vector3};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{alpha1, alphanumeric1, multispace0, space0},
    combinator::{map, map_res, recognize},
    multi::{many0, many1, separated_list1},
    sequence::{delimited, pair, separated_pair, terminated},
};
use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub type SectionMap = HashMap<String, Vec<Value>>;
pub type DocumentMap = HashMap<String, SectionMap>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Float(f64),
    Integer(i64),
    Boolean(bool),
}

impl Value {
    /// integers are accepted where a float is expected
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        if let Value::Integer(i) = self {
            Some(*i)
        } else {
            None
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        if let Value::Boolean(b) = self {
            Some(*b)
        } else {
            None
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::Float(val) => write!(f, "{}", val),
            Value::Integer(val) => write!(f, "{}", val),
            Value::Boolean(val) => write!(f, "{}", val),
        }
    }
}

/// word characters without spaces
fn parse_word(input: &str) -> IResult<&str, String> {
    let parser = recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ));
    map(parser, String::from).parse(input)
}

fn parse_title(input: &str) -> IResult<&str, String> {
    let (input, result) = parse_word(input)?;
    Ok((input.trim_start(), result))
}

fn parse_value(input: &str) -> IResult<&str, Value> {
    let value_parser = take_while1(|c: char| !matches!(c, ',' | ' ' | '\t' | '\n' | '\r' | ';'));
    map_res(value_parser, |s: &str| -> Result<Value, String> {
        let s = s.trim();
        if let Ok(val) = s.parse::<i64>() {
            Ok(Value::Integer(val))
        } else if let Ok(val) = s.parse::<f64>() {
            Ok(Value::Float(val))
        } else if let Ok(val) = s.parse::<bool>() {
            Ok(Value::Boolean(val))
        } else {
            Ok(Value::String(s.to_string()))
        }
    })
    .parse(input)
}

fn parse_value_list(input: &str) -> IResult<&str, Vec<Value>> {
    let separator_comma = delimited(space0, tag(","), space0);
    separated_list1(separator_comma, parse_value).parse(input)
}

/// `key: value1, value2`
fn parse_key_value_pair(input: &str) -> IResult<&str, (String, Vec<Value>)> {
    let colon_separator = delimited(space0, tag(":"), space0);
    let (input, result) =
        separated_pair(parse_word, colon_separator, parse_value_list).parse(input)?;
    Ok((input.trim_start(), result))
}

/// title followed by one or more key-value pairs
fn parse_section(input: &str) -> IResult<&str, (String, SectionMap)> {
    let (input, _) = space0(input)?;
    let (input, title) = parse_title(input)?;
    let (input, pairs) = many1(terminated(parse_key_value_pair, space0)).parse(input)?;
    Ok((input, (title, pairs.into_iter().collect())))
}

/// drops comment lines, trailing `//` comments and empty lines
fn filter_comments(input: &str) -> String {
    input
        .lines()
        .map(|line| line.split("//").next().unwrap_or("").trim_end())
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.starts_with('#')
                && !trimmed.starts_with('%')
                && !trimmed.starts_with(';')
                && !trimmed.is_empty()
        })
        .collect::<Vec<&str>>()
        .join("\n")
}

/// Parses the document (comments must already be removed)
pub fn parse_document(input: &str) -> IResult<&str, DocumentMap> {
    let mut parser = many1(delimited(multispace0, parse_section, multispace0));
    let (input, sections) = parser.parse(input)?;
    Ok((input, sections.into_iter().collect()))
}

/// Parses a whole document with comments; anything left unparsed is an error
pub fn parse_document_as(input: &str) -> Result<DocumentMap, InversionError> {
    let filtered = filter_comments(input);
    match parse_document(&filtered) {
        Ok((remaining, parsed)) => {
            if !remaining.trim().is_empty() {
                return Err(InversionError::Parse(format!(
                    "failed to parse entire document, remaining: '{}'",
                    remaining
                )));
            }
            Ok(parsed)
        }
        Err(e) => Err(InversionError::Parse(format!("{:?}", e))),
    }
}

/// typed access to the parsed sections
struct Sections<'a>(&'a DocumentMap);

impl<'a> Sections<'a> {
    fn values(&self, section: &str, key: &str) -> Option<&'a Vec<Value>> {
        self.0.get(section).and_then(|s| s.get(key))
    }

    fn floats(&self, section: &str, key: &str) -> Result<Option<Vec<f64>>, InversionError> {
        let Some(values) = self.values(section, key) else {
            return Ok(None);
        };
        values
            .iter()
            .map(|v| {
                v.as_float().ok_or_else(|| {
                    InversionError::Parse(format!("{}.{}: '{}' is not a number", section, key, v))
                })
            })
            .collect::<Result<Vec<f64>, _>>()
            .map(Some)
    }

    fn floats_n(&self, section: &str, key: &str, n: usize) -> Result<Option<Vec<f64>>, InversionError> {
        match self.floats(section, key)? {
            Some(v) if v.len() != n => Err(InversionError::Parse(format!(
                "{}.{} needs {} values, got {}",
                section,
                key,
                n,
                v.len()
            ))),
            other => Ok(other),
        }
    }

    fn float(&self, section: &str, key: &str) -> Result<Option<f64>, InversionError> {
        Ok(self.floats_n(section, key, 1)?.map(|v| v[0]))
    }

    fn required_float(&self, section: &str, key: &str) -> Result<f64, InversionError> {
        self.float(section, key)?
            .ok_or_else(|| missing(section, key))
    }

    fn required_pair(&self, section: &str, key: &str) -> Result<(f64, f64), InversionError> {
        let v = self
            .floats_n(section, key, 2)?
            .ok_or_else(|| missing(section, key))?;
        Ok((v[0], v[1]))
    }

    fn integer(&self, section: &str, key: &str) -> Result<Option<usize>, InversionError> {
        let Some(values) = self.values(section, key) else {
            return Ok(None);
        };
        match values.as_slice() {
            [v] => v
                .as_integer()
                .and_then(|i| usize::try_from(i).ok())
                .map(Some)
                .ok_or_else(|| {
                    InversionError::Parse(format!(
                        "{}.{}: '{}' is not a non-negative integer",
                        section, key, v
                    ))
                }),
            _ => Err(InversionError::Parse(format!(
                "{}.{} needs exactly one value",
                section, key
            ))),
        }
    }

    fn boolean(&self, section: &str, key: &str) -> Result<Option<bool>, InversionError> {
        let Some(values) = self.values(section, key) else {
            return Ok(None);
        };
        match values.as_slice() {
            [v] => v.as_boolean().map(Some).ok_or_else(|| {
                InversionError::Parse(format!("{}.{}: '{}' is not true or false", section, key, v))
            }),
            _ => Err(InversionError::Parse(format!(
                "{}.{} needs exactly one value",
                section, key
            ))),
        }
    }

    fn text(&self, section: &str, key: &str) -> Option<String> {
        self.values(section, key)
            .and_then(|v| v.first())
            .map(|v| v.to_string())
    }
}

fn missing(section: &str, key: &str) -> InversionError {
    InversionError::Parse(format!("missing required entry {}.{}", section, key))
}

/// Typed content of a task document
#[derive(Debug, Clone)]
pub struct InversionTask {
    pub layout: PrismLayout,
    pub z0: f64,
    pub magnetization: Vector3<f64>,
    pub field: MainField,
    pub steps: FiniteDifferenceSteps,
    pub controls: IterationControls,
    pub loss: LossNorm,
    pub normalize_weights: bool,
    pub loglevel: Option<String>,
    pub bounds: Bounds,
    pub weights: RegularizationWeights,
    pub outcrop: DVector<f64>,
    pub m0: DVector<f64>,
    pub data_file: Option<PathBuf>,
}

impl FromStr for InversionTask {
    type Err = InversionError;

    fn from_str(document: &str) -> Result<Self, Self::Err> {
        let doc = parse_document_as(document)?;
        let s = Sections(&doc);

        let vertices = s.integer("geometry", "vertices")?.ok_or_else(|| missing("geometry", "vertices"))?;
        let prisms = s.integer("geometry", "prisms")?.unwrap_or(1);
        let layout = PrismLayout::new(vertices, prisms)?;
        let z0 = s.required_float("geometry", "z0")?;
        let mag = s
            .floats_n("geometry", "magnetization", 3)?
            .ok_or_else(|| missing("geometry", "magnetization"))?;
        let magnetization = ang2vec(mag[0], mag[1], mag[2]);
        let field = MainField::new(s.required_float("field", "inc")?, s.required_float("field", "dec")?);

        let defaults = FiniteDifferenceSteps::default();
        let steps = FiniteDifferenceSteps::new(
            s.float("steps", "dr")?.unwrap_or(defaults.dr),
            s.float("steps", "dx")?.unwrap_or(defaults.dx),
            s.float("steps", "dy")?.unwrap_or(defaults.dy),
            s.float("steps", "dz")?.unwrap_or(defaults.dz),
        )?;

        let defaults = IterationControls::default();
        let mut controls = IterationControls::default()
            .with_maxit(s.integer("solver", "maxit")?.unwrap_or(defaults.maxit))
            .with_maxsteps(s.integer("solver", "maxsteps")?.unwrap_or(defaults.maxsteps))
            .with_lambda(
                s.float("solver", "lambda")?.unwrap_or(defaults.lambda0),
                s.float("solver", "dlambda")?.unwrap_or(defaults.dlambda),
            )
            .with_tol(s.float("solver", "tol")?.unwrap_or(defaults.tol));
        if let Some(seconds) = s.float("solver", "max_seconds")? {
            let budget = Duration::try_from_secs_f64(seconds)
                .map_err(|e| InversionError::Parse(format!("solver.max_seconds: {}", e)))?;
            controls = controls.with_max_duration(budget);
        }
        controls.validate()?;
        let loss = match s.text("solver", "loss") {
            Some(name) => LossNorm::from_str(&name)
                .map_err(|_| InversionError::Parse(format!("solver.loss: unknown norm '{}'", name)))?,
            None => LossNorm::Quadratic,
        };
        let normalize_weights = s.boolean("solver", "normalize")?.unwrap_or(true);
        let loglevel = s.text("solver", "loglevel");

        let (rmin, rmax) = s.required_pair("bounds", "radius")?;
        let (x0min, x0max) = s.required_pair("bounds", "x0")?;
        let (y0min, y0max) = s.required_pair("bounds", "y0")?;
        let (dzmin, dzmax) = s.required_pair("bounds", "dz")?;
        let bounds = Bounds::from_ranges(&layout, rmin, rmax, x0min, x0max, y0min, y0max, dzmin, dzmax)?;

        let weights = match s.floats_n("regularization", "alpha", N_TERMS)? {
            Some(alpha) => {
                let mut a = [0.0; N_TERMS];
                a.copy_from_slice(&alpha);
                RegularizationWeights::new(a)?
            }
            None => RegularizationWeights::zeros(),
        };

        let x0 = s.float("initial", "x0")?.unwrap_or(0.0);
        let y0 = s.float("initial", "y0")?.unwrap_or(0.0);
        let dz = s.required_float("initial", "dz")?;
        let radius = s.required_float("initial", "radius")?;
        let (_, m0) = initial_cylinder(&layout, x0, y0, z0, dz, radius, &magnetization)?;

        let outcrop = match s.floats_n("outcrop", "target", layout.block())? {
            Some(target) => DVector::from_vec(target),
            None => m0.rows(0, layout.block()).into_owned(),
        };

        Ok(InversionTask {
            layout,
            z0,
            magnetization,
            field,
            steps,
            controls,
            loss,
            normalize_weights,
            loglevel,
            bounds,
            weights,
            outcrop,
            m0,
            data_file: s.text("data", "file").map(PathBuf::from),
        })
    }
}

impl InversionTask {
    pub fn from_file(path: &Path) -> Result<Self, InversionError> {
        let document = std::fs::read_to_string(path)?;
        let mut task = InversionTask::from_str(&document)?;
        // survey files are looked up next to the task file
        if let (Some(file), Some(dir)) = (&task.data_file, path.parent()) {
            if file.is_relative() {
                task.data_file = Some(dir.join(file));
            }
        }
        Ok(task)
    }

    /// reads the survey named in the `data` section and assembles the problem
    pub fn into_problem(self) -> Result<InversionProblem, InversionError> {
        let file = self
            .data_file
            .clone()
            .ok_or_else(|| missing("data", "file"))?;
        let (points, observed) = read_survey_csv(&file)?;
        Ok(InversionProblem::new(
            points,
            observed,
            self.field,
            ModelSetup::new(self.layout, self.z0, self.magnetization),
            self.m0,
            self.bounds,
            self.outcrop,
        )
        .with_steps(self.steps)
        .with_controls(self.controls)
        .with_weights(self.weights)
        .with_loss(self.loss)
        .with_normalized_weights(self.normalize_weights))
    }
}
