use log::info;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tabled::{builder::Builder, settings::Style};

pub fn elapsed_time(elapsed: Duration) -> (String, f64) {
    let time = elapsed.as_millis();
    if time < 1000 {
        info!("Elapsed {} ms", time);
        (" ms ".to_string(), time as f64)
    } else if time < 60_000 {
        info!("Elapsed {} s", elapsed.as_secs());
        (" s".to_string(), elapsed.as_secs_f64())
    } else if time < 3_600_000 {
        info!("Elapsed {} min", elapsed.as_secs() / 60);
        (" min".to_string(), elapsed.as_secs_f64() / 60.0)
    } else {
        info!("Elapsed {} h", elapsed.as_secs() / 3600);
        (" h".to_string(), elapsed.as_secs_f64() / 3600.0)
    }
}

/// Accumulates the time spent in the forward operator, the Jacobian builds and the
/// damped linear solves of an inversion
#[derive(Debug, Clone)]
pub struct CustomTimer {
    pub start: Instant,
    pub jac_time: Instant,
    pub jac: Duration,
    pub fun_time: Instant,
    pub fun: Duration,
    pub linear_system_time: Instant,
    pub linear_system: Duration,
}

impl Default for CustomTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl CustomTimer {
    pub fn new() -> CustomTimer {
        CustomTimer {
            start: Instant::now(),
            jac_time: Instant::now(),
            jac: Duration::from_secs(0),
            fun_time: Instant::now(),
            fun: Duration::from_secs(0),
            linear_system_time: Instant::now(),
            linear_system: Duration::from_secs(0),
        }
    }

    pub fn start(&mut self) {
        *self = CustomTimer::new();
    }

    pub fn jac_tic(&mut self) {
        self.jac_time = Instant::now();
    }

    pub fn jac_tac(&mut self) {
        self.jac += self.jac_time.elapsed();
    }

    pub fn fun_tic(&mut self) {
        self.fun_time = Instant::now();
    }

    pub fn fun_tac(&mut self) {
        self.fun += self.fun_time.elapsed();
    }

    pub fn linear_system_tic(&mut self) {
        self.linear_system_time = Instant::now();
    }

    pub fn linear_system_tac(&mut self) {
        self.linear_system += self.linear_system_time.elapsed();
    }

    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }

    /// share of the total time spent in every stage, only stages above 0.5% are listed
    pub fn get_all(&self) -> HashMap<String, String> {
        let mut timer_data: HashMap<String, String> = HashMap::new();
        let total_time = (self.start.elapsed().as_nanos() as f64).max(1.0);
        let total_time_string = elapsed_time(self.start.elapsed());
        timer_data.insert(
            "time elapsed, ".to_string() + total_time_string.0.as_str(),
            format!("{}", total_time_string.1),
        );
        let mut other = total_time;
        for (name, stage) in [
            ("Jacobian", self.jac),
            ("Forward operator", self.fun),
            ("Linear System", self.linear_system),
        ] {
            let stage_total = stage.as_nanos() as f64;
            other -= stage_total;
            let percent = 100.0 * stage_total / total_time;
            if percent > 0.5 {
                let stage_string = elapsed_time(stage);
                timer_data.insert(
                    format!("{} (%, {})", name, stage_string.0),
                    format!("{}, {}", (percent * 1000.0).round() / 1000.0, stage_string.1),
                );
            }
        }
        let other_percent = 100.0 * other / total_time;
        if other_percent > 0.5 {
            timer_data.insert(
                "other %".to_string(),
                format!("{} ", (other_percent * 1000.0).round() / 1000.0),
            );
        }
        let mut table = Builder::from(timer_data.clone()).build();
        table.with(Style::modern_rounded());
        info!("\n \n TIMER \n \n {}", table);
        timer_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_time_picks_units() {
        assert_eq!(elapsed_time(Duration::from_millis(20)).0, " ms ");
        let (unit, value) = elapsed_time(Duration::from_secs(90));
        assert_eq!(unit, " min");
        assert!((value - 1.5).abs() < 1e-12);
    }

    #[test]
    fn timer_accumulates_stages() {
        let mut timer = CustomTimer::new();
        timer.jac_tic();
        std::thread::sleep(Duration::from_millis(5));
        timer.jac_tac();
        assert!(timer.jac >= Duration::from_millis(5));
        let data = timer.get_all();
        assert!(data.keys().any(|k| k.starts_with("time elapsed")));
    }
}
