//! Read-only aggregations over attempts and mastery records.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::domain::{Attempt, MasteryRecord};
use crate::quiz::grading::round2;

pub const STRONG_THRESHOLD: f64 = 75.0;
pub const WEAK_THRESHOLD: f64 = 50.0;
pub const MAX_WEEKS: i64 = 52;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Band {
  Strong,
  Medium,
  Weak,
}

/// `< 50` weak, `[50, 75)` medium, `>= 75` strong.
pub fn classify(score: f64) -> Band {
  if score >= STRONG_THRESHOLD {
    Band::Strong
  } else if score < WEAK_THRESHOLD {
    Band::Weak
  } else {
    Band::Medium
  }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct StudentStats {
  pub total_attempts: usize,
  pub avg_score: f64,
  pub highest_score: Option<f64>,
  pub lowest_score: Option<f64>,
  pub streak_days: u32,
  pub last_attempt_at: Option<DateTime<Utc>>,
}

pub fn student_stats<'a>(attempts: impl IntoIterator<Item = &'a Attempt>) -> StudentStats {
  let mut scores = Vec::new();
  let mut days = HashSet::new();
  let mut last: Option<DateTime<Utc>> = None;

  for a in attempts {
    scores.push(a.score);
    days.insert(a.submitted_at.date_naive());
    if last.map_or(true, |l| a.submitted_at > l) {
      last = Some(a.submitted_at);
    }
  }

  let avg_score = if scores.is_empty() { 0.0 } else { round2(scores.iter().sum::<f64>() / scores.len() as f64) };
  let highest_score = scores.iter().copied().reduce(f64::max).map(round2);
  let lowest_score = scores.iter().copied().reduce(f64::min).map(round2);
  let streak_days = last.map_or(0, |l| streak_ending_at(&days, l.date_naive()));

  StudentStats { total_attempts: scores.len(), avg_score, highest_score, lowest_score, streak_days, last_attempt_at: last }
}

/// Consecutive calendar days present in `days`, counting back from `end`.
pub fn streak_ending_at(days: &HashSet<NaiveDate>, end: NaiveDate) -> u32 {
  let mut streak = 0;
  let mut cursor = end;
  while days.contains(&cursor) {
    streak += 1;
    match cursor.pred_opt() {
      Some(prev) => cursor = prev,
      None => break,
    }
  }
  streak
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TopicMastery {
  pub subject: String,
  pub topic: String,
  pub mastery: f64,
}

#[derive(Clone, Debug, Serialize, Default)]
pub struct TopicReport {
  pub strong_topics: Vec<TopicMastery>,
  pub medium_topics: Vec<TopicMastery>,
  pub weak_topics: Vec<TopicMastery>,
}

pub fn topic_report<'a>(records: impl IntoIterator<Item = &'a MasteryRecord>) -> TopicReport {
  let mut report = TopicReport::default();
  for r in records {
    let entry = TopicMastery { subject: r.subject.clone(), topic: r.topic.clone(), mastery: r.score };
    match classify(r.score) {
      Band::Strong => report.strong_topics.push(entry),
      Band::Medium => report.medium_topics.push(entry),
      Band::Weak => report.weak_topics.push(entry),
    }
  }
  report.strong_topics.sort_by(|a, b| b.mastery.total_cmp(&a.mastery));
  report.weak_topics.sort_by(|a, b| a.mastery.total_cmp(&b.mastery));
  report
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct WeekBucket {
  pub week_start: NaiveDate,
  pub label: String,
  pub attempts: usize,
  pub avg_score: f64,
}

pub fn clamp_weeks(weeks: i64) -> usize {
  weeks.clamp(1, MAX_WEEKS) as usize
}

pub fn monday_of(day: NaiveDate) -> NaiveDate {
  day - Duration::days(day.weekday().num_days_from_monday() as i64)
}

/// Average score per Monday-aligned week over the trailing window ending at
/// `now`, oldest week first. Always `weeks` entries long.
pub fn weekly_progress<'a>(
  attempts: impl IntoIterator<Item = &'a Attempt>,
  weeks: usize,
  now: DateTime<Utc>,
) -> Vec<WeekBucket> {
  let window_start = now - Duration::days(7 * weeks as i64);

  let mut buckets: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
  for a in attempts.into_iter().filter(|a| a.submitted_at >= window_start) {
    let slot = buckets.entry(monday_of(a.submitted_at.date_naive())).or_insert((0.0, 0));
    slot.0 += a.score;
    slot.1 += 1;
  }

  (0..weeks)
    .rev()
    .map(|i| {
      let week_start = monday_of((now - Duration::days(7 * i as i64)).date_naive());
      let (attempts, avg_score) = match buckets.get(&week_start) {
        Some(&(sum, count)) if count > 0 => (count, round2(sum / count as f64)),
        _ => (0, 0.0),
      };
      WeekBucket { week_start, label: week_start.format("%d %b").to_string(), attempts, avg_score }
    })
    .collect()
}
