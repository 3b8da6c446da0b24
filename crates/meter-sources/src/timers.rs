//! Clock-driven sources: Pomodoro and CountdownTimer

use async_trait::async_trait;
use chrono::{Local, NaiveTime, TimeDelta, Timelike};
use meter_core::state::{GREEN, METER, RED};
use meter_core::{
    DesiredPatch, Error, OptionSpec, OptionStore, ReportedState, Result, Source, SourceFactory,
};
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Which way the gauge moves as a phase elapses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// 0 → 100
    Up,
    /// 100 → 0
    Down,
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            other => Err(Error::config(format!(
                "argument --direction: invalid choice: '{}' (choose from up, down)",
                other
            ))),
        }
    }
}

const MIN_PHASE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Work,
    Break,
}

/// Alternating work/break timer
#[derive(Debug)]
pub struct Pomodoro {
    name: String,
    min_cycle: Duration,
    work: Duration,
    rest: Duration,
    direction: Direction,
    phase: Phase,
    phase_start: Instant,
}

impl Pomodoro {
    /// Start a work phase now
    ///
    /// Phases shorter than one second are stretched to one second.
    pub fn new(
        name: impl Into<String>,
        min_cycle: Duration,
        work: Duration,
        rest: Duration,
        direction: Direction,
    ) -> Self {
        Self {
            name: name.into(),
            min_cycle,
            work: work.max(MIN_PHASE),
            rest: rest.max(MIN_PHASE),
            direction,
            phase: Phase::Work,
            phase_start: Instant::now(),
        }
    }

    fn phase_length(&self) -> Duration {
        match self.phase {
            Phase::Work => self.work,
            Phase::Break => self.rest,
        }
    }

    fn patch_at(&mut self, now: Instant) -> DesiredPatch {
        while now > self.phase_start + self.phase_length() {
            self.phase_start += self.phase_length();
            self.phase = match self.phase {
                Phase::Work => Phase::Break,
                Phase::Break => Phase::Work,
            };
            info!("{} phase started", if self.phase == Phase::Work { "Work" } else { "Break" });
        }

        let elapsed = now.duration_since(self.phase_start).as_secs_f64();
        let progress = elapsed / self.phase_length().as_secs_f64() * 100.0;
        let meter = match self.direction {
            Direction::Up => progress,
            Direction::Down => 100.0 - progress,
        };

        DesiredPatch::new()
            .with(METER, meter)
            .with(GREEN, if self.phase == Phase::Break { 50.0 } else { 0.0 })
    }
}

#[async_trait]
impl Source for Pomodoro {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_cycle(&self) -> Duration {
        self.min_cycle
    }

    async fn update(&mut self, _reported: &ReportedState) -> Result<DesiredPatch> {
        Ok(self.patch_at(Instant::now()))
    }
}

/// Factory for [`Pomodoro`]
pub struct PomodoroFactory;

fn minutes(options: &meter_core::ResolvedOptions, dest: &str) -> Result<Duration> {
    let value: u64 = options.require(dest)?;
    if value == 0 {
        return Err(Error::config(format!(
            "argument --{}: must be at least 1 minute",
            dest.replace('_', "-")
        )));
    }
    Ok(Duration::from_secs(value * 60))
}

#[async_trait]
impl SourceFactory for PomodoroFactory {
    fn description(&self) -> &'static str {
        "Pomodoro timer"
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec::value("--work-time")
                .integer()
                .default("25")
                .metavar("MINUTES")
                .help("work period is MINUTES long"),
            OptionSpec::value("--break-time")
                .integer()
                .default("5")
                .metavar("MINUTES")
                .help("break period is MINUTES long"),
            OptionSpec::value("--direction")
                .choices(&["up", "down"])
                .default("down")
                .help("if \"down\", meter moves from 100 to 0"),
        ]
    }

    async fn create(
        &self,
        name: &str,
        args: &[String],
        min_cycle: Duration,
        store: &mut OptionStore,
    ) -> Result<Box<dyn Source>> {
        let options = store.resolve(name, &self.options(), args).await?;
        Ok(Box::new(Pomodoro::new(
            name,
            min_cycle,
            minutes(&options, "work_time")?,
            minutes(&options, "break_time")?,
            options.require("direction")?,
        )))
    }
}

/// Counts down to a wall-clock time or for a fixed duration
#[derive(Debug)]
pub struct CountdownTimer {
    name: String,
    min_cycle: Duration,
    deadline: Instant,
    total: Duration,
}

impl CountdownTimer {
    /// Count down `total`, starting now
    pub fn new(name: impl Into<String>, min_cycle: Duration, total: Duration) -> Result<Self> {
        if total.is_zero() {
            return Err(Error::config("argument end_time: countdown must be longer than zero"));
        }
        Ok(Self {
            name: name.into(),
            min_cycle,
            deadline: Instant::now() + total,
            total,
        })
    }

    fn patch_at(&self, now: Instant) -> DesiredPatch {
        countdown_patch(self.deadline.saturating_duration_since(now), self.total)
    }
}

/// Gauge shows the remaining share; red ramps up over the last tenth
fn countdown_patch(remaining: Duration, total: Duration) -> DesiredPatch {
    let meter = (remaining.as_secs_f64() / total.as_secs_f64() * 100.0).max(0.0);
    let red = if meter <= 10.0 { 100.0 - meter * 10.0 } else { 0.0 };

    DesiredPatch::new().with(METER, meter).with(RED, red)
}

/// Parse `HH:MM`
fn parse_clock(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|_| Error::config(format!("argument end_time: expected HH:MM, got '{}'", raw)))
}

/// Time until the next occurrence of `end` on the local clock
///
/// An end time already passed today refers to tomorrow.
fn until_clock(end: NaiveTime) -> Result<Duration> {
    let now = Local::now().naive_local();
    let mut target = now.date().and_time(end);
    if target <= now {
        target += TimeDelta::days(1);
    }
    (target - now)
        .to_std()
        .map_err(|e| Error::config(format!("argument end_time: {}", e)))
}

#[async_trait]
impl Source for CountdownTimer {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_cycle(&self) -> Duration {
        self.min_cycle
    }

    async fn update(&mut self, _reported: &ReportedState) -> Result<DesiredPatch> {
        Ok(self.patch_at(Instant::now()))
    }
}

/// Factory for [`CountdownTimer`]
pub struct CountdownTimerFactory;

#[async_trait]
impl SourceFactory for CountdownTimerFactory {
    fn description(&self) -> &'static str {
        "Countdown timer"
    }

    fn options(&self) -> Vec<OptionSpec> {
        vec![
            OptionSpec::positional("end_time").metavar("HH:MM"),
            OptionSpec::flag("--duration")
                .no_persist()
                .help("time is duration, not end time"),
        ]
    }

    async fn create(
        &self,
        name: &str,
        args: &[String],
        min_cycle: Duration,
        store: &mut OptionStore,
    ) -> Result<Box<dyn Source>> {
        let options = store.resolve(name, &self.options(), args).await?;
        let end = parse_clock(options.require_str("end_time")?)?;

        let total = if options.get_bool("duration") {
            Duration::from_secs(u64::from(end.hour()) * 3600 + u64::from(end.minute()) * 60)
        } else {
            until_clock(end)?
        };
        info!("Counting down {:?}", total);

        Ok(Box::new(CountdownTimer::new(name, min_cycle, total)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(patch: &DesiredPatch, name: &str) -> f64 {
        patch.get(name).and_then(|v| v.as_f64()).unwrap()
    }

    fn mins(n: u64) -> Duration {
        Duration::from_secs(n * 60)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pomodoro_counts_down_through_work() {
        let mut pomodoro = Pomodoro::new("Pomodoro", mins(0), mins(25), mins(5), Direction::Down);
        let start = Instant::now();

        let patch = pomodoro.patch_at(start + mins(5));

        assert_eq!(field(&patch, METER), 80.0);
        assert_eq!(field(&patch, GREEN), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pomodoro_switches_to_break() {
        let mut pomodoro = Pomodoro::new("Pomodoro", mins(0), mins(25), mins(5), Direction::Up);
        let start = Instant::now();

        let patch = pomodoro.patch_at(start + mins(26));

        assert_eq!(pomodoro.phase, Phase::Break);
        assert_eq!(field(&patch, METER), 20.0);
        assert_eq!(field(&patch, GREEN), 50.0);

        // Long gap: 25 + 5 + 25 min later the next break has begun
        let patch = pomodoro.patch_at(start + mins(56));
        assert_eq!(pomodoro.phase, Phase::Break);
        assert_eq!(field(&patch, METER), 20.0);
    }

    #[test]
    fn test_countdown_patch() {
        let total = mins(100);

        let patch = countdown_patch(mins(50), total);
        assert_eq!(field(&patch, METER), 50.0);
        assert_eq!(field(&patch, RED), 0.0);

        let patch = countdown_patch(mins(5), total);
        assert_eq!(field(&patch, METER), 5.0);
        assert_eq!(field(&patch, RED), 50.0);

        let patch = countdown_patch(Duration::ZERO, total);
        assert_eq!(field(&patch, METER), 0.0);
        assert_eq!(field(&patch, RED), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_clamps_after_deadline() {
        let timer = CountdownTimer::new("CountdownTimer", mins(0), mins(10)).unwrap();

        let patch = timer.patch_at(Instant::now() + mins(30));

        assert_eq!(field(&patch, METER), 0.0);
        assert_eq!(field(&patch, RED), 100.0);
    }

    #[tokio::test]
    async fn test_end_time_and_duration_are_not_persisted() {
        let mut store = OptionStore::in_memory();
        let args: Vec<String> = ["0:30", "--duration"].iter().map(|s| s.to_string()).collect();

        CountdownTimerFactory
            .create("CountdownTimer", &args, Duration::from_secs(4), &mut store)
            .await
            .unwrap();

        assert_eq!(store.get("CountdownTimer", "end_time"), None);
        assert_eq!(store.get("CountdownTimer", "duration"), None);

        // a stale end time must not stand in for the positional next run
        let second = CountdownTimerFactory
            .create("CountdownTimer", &[], Duration::from_secs(4), &mut store)
            .await;
        match second {
            Err(err) => assert!(err.is_configuration()),
            Ok(_) => panic!("expected the missing end time to be rejected"),
        }
    }

    #[test]
    fn test_clock_parsing() {
        assert_eq!(parse_clock("17:45").unwrap(), NaiveTime::from_hms_opt(17, 45, 0).unwrap());
        assert!(parse_clock("5pm").unwrap_err().is_configuration());
        assert!(until_clock(parse_clock("12:00").unwrap()).unwrap() <= Duration::from_secs(86_400));
    }

    #[tokio::test]
    async fn test_pomodoro_rejects_zero_minutes() {
        let mut store = OptionStore::in_memory();
        let args = vec!["--work-time".to_string(), "0".to_string()];

        let result = PomodoroFactory
            .create("Pomodoro", &args, Duration::from_secs(4), &mut store)
            .await;

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!("up".parse::<Direction>().unwrap(), Direction::Up);
        assert_eq!("down".parse::<Direction>().unwrap(), Direction::Down);
        assert!("sideways".parse::<Direction>().is_err());
    }
}
