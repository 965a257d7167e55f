use crate::geophysics::polyprism::ObservationPoints;
use crate::numerical::optimization::LM_polyprism::InversionHistory;
use crate::numerical::optimization::inversion_errors::InversionError;
use chrono::Local;
use csv::{ReaderBuilder, Writer};
use nalgebra::DVector;
use simplelog::{ColorChoice, CombinedLogger, Config, LevelFilter, SharedLogger, TermLogger, TerminalMode, WriteLogger};
use std::fs::File;
use std::path::Path;

/// Maps a loglevel name to a filter; `None` means logging is switched off
pub fn parse_loglevel(loglevel: &Option<String>) -> Result<Option<LevelFilter>, InversionError> {
    let Some(level) = loglevel else {
        return Ok(Some(LevelFilter::Info));
    };
    match level.as_str() {
        "off" | "none" => Ok(None),
        "debug" => Ok(Some(LevelFilter::Debug)),
        "info" => Ok(Some(LevelFilter::Info)),
        "warn" => Ok(Some(LevelFilter::Warn)),
        "error" => Ok(Some(LevelFilter::Error)),
        other => Err(InversionError::PreconditionViolation(format!(
            "loglevel must be debug, info, warn, error, off or none, got {}",
            other
        ))),
    }
}

/// Terminal logger plus, optionally, a `log_<date>.txt` file logger. A logger set up
/// by an earlier run is kept.
pub fn init_logger(loglevel: &Option<String>, log_to_file: bool) -> Result<(), InversionError> {
    let Some(log_option) = parse_loglevel(loglevel)? else {
        return Ok(());
    };
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        log_option,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if log_to_file {
        let date_and_time = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let name = format!("log_{}.txt", date_and_time);
        loggers.push(WriteLogger::new(log_option, Config::default(), File::create(name)?));
    }
    // only the first initialisation in a process succeeds
    let _ = CombinedLogger::init(loggers);
    Ok(())
}

/// iteration, objective and data misfit of every history entry
pub fn save_history_to_csv(history: &InversionHistory, path: &Path) -> Result<(), InversionError> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record(["iteration", "objective", "misfit"])?;
    for (i, (phi, misfit)) in history.objectives.iter().zip(history.misfits.iter()).enumerate() {
        writer.write_record(&[i.to_string(), phi.to_string(), misfit.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

/// observation points with observed and fitted anomalies
pub fn save_data_to_csv(
    points: &ObservationPoints,
    observed: &DVector<f64>,
    fitted: &DVector<f64>,
    path: &Path,
) -> Result<(), InversionError> {
    if observed.len() != points.len() || fitted.len() != points.len() {
        return Err(InversionError::PreconditionViolation(format!(
            "{} points, {} observed and {} fitted values",
            points.len(),
            observed.len(),
            fitted.len()
        )));
    }
    let mut writer = Writer::from_path(path)?;
    writer.write_record(["x", "y", "z", "observed", "fitted", "residual"])?;
    for i in 0..points.len() {
        let row = [
            points.x[i],
            points.y[i],
            points.z[i],
            observed[i],
            fitted[i],
            observed[i] - fitted[i],
        ];
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

/// reads a survey file with header and columns `x, y, z, tf`; extra columns are ignored
pub fn read_survey_csv(path: &Path) -> Result<(ObservationPoints, DVector<f64>), InversionError> {
    let mut reader = ReaderBuilder::new()
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_path(path)?;
    let (mut x, mut y, mut z, mut tf) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() < 4 {
            return Err(InversionError::Parse(format!(
                "row {} of {} has {} columns, expected x, y, z, tf",
                line + 1,
                path.display(),
                record.len()
            )));
        }
        let mut values = [0.0; 4];
        for (k, value) in values.iter_mut().enumerate() {
            *value = record[k].parse::<f64>().map_err(|e| {
                InversionError::Parse(format!("row {}, column {}: {}", line + 1, k + 1, e))
            })?;
        }
        x.push(values[0]);
        y.push(values[1]);
        z.push(values[2]);
        tf.push(values[3]);
    }
    let points = ObservationPoints::new(DVector::from_vec(x), DVector::from_vec(y), DVector::from_vec(z))?;
    Ok((points, DVector::from_vec(tf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loglevels() {
        assert_eq!(parse_loglevel(&None).unwrap(), Some(LevelFilter::Info));
        assert_eq!(parse_loglevel(&Some("off".to_string())).unwrap(), None);
        assert_eq!(
            parse_loglevel(&Some("warn".to_string())).unwrap(),
            Some(LevelFilter::Warn)
        );
        assert!(parse_loglevel(&Some("verbose".to_string())).is_err());
        assert!(init_logger(&Some("none".to_string()), false).is_ok());
    }

    #[test]
    fn survey_written_as_data_is_read_back() {
        let points = ObservationPoints::regular_grid([0.0, 100.0, -50.0, 50.0], (3, 2), -1.5);
        let observed = DVector::from_vec(vec![1.0, 2.5, -3.0, 4.0, 0.0, 12.25]);
        let fitted = &observed * 0.5;
        let file = NamedTempFile::new().unwrap();
        save_data_to_csv(&points, &observed, &fitted, file.path()).unwrap();
        let (read_points, tf) = read_survey_csv(file.path()).unwrap();
        assert_eq!(read_points.len(), 6);
        assert_relative_eq!(read_points.x[2], 100.0);
        assert_relative_eq!(read_points.z[5], -1.5);
        assert_relative_eq!(tf, observed);
    }

    #[test]
    fn malformed_survey_is_a_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "x,y,z,tf").unwrap();
        writeln!(file, "1.0,2.0,0.0,abc").unwrap();
        file.flush().unwrap();
        match read_survey_csv(file.path()) {
            Err(InversionError::Parse(msg)) => assert!(msg.contains("column 4")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn history_has_one_row_per_entry() {
        let history = InversionHistory {
            objectives: vec![10.0, 5.0, 4.0],
            misfits: vec![9.0, 4.5, 3.9],
            ..InversionHistory::default()
        };
        let file = NamedTempFile::new().unwrap();
        save_history_to_csv(&history, file.path()).unwrap();
        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "iteration,objective,misfit");
        assert_eq!(lines[2], "1,5,4.5");
    }
}
