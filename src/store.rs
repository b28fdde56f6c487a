//! In-process record store with all-or-nothing transactions and an optional
//! JSON snapshot on disk.
//!
//! Every mutation goes through [`Store::transact`]: the closure works on a
//! copy of the tables, the copy is persisted, and only then swapped in. A
//! failing closure or a failing write leaves the live state untouched.
//! Writers are serialized by the lock, so read-modify-write sequences inside
//! one transaction never interleave.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{Attempt, Course, Lesson, MasteryRecord, Quiz, User};
use crate::error::{EduError, EduResult};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Tables {
  #[serde(default)] pub users: HashMap<String, User>,
  #[serde(default)] pub courses: HashMap<Uuid, Course>,
  #[serde(default)] pub enrollments: Vec<(Uuid, String)>,
  #[serde(default)] pub lessons: HashMap<Uuid, Lesson>,
  #[serde(default)] pub quizzes: HashMap<Uuid, Quiz>,
  #[serde(default)] pub attempts: Vec<Attempt>,
  #[serde(default)] pub mastery: Vec<MasteryRecord>,
}

impl Tables {
  pub fn course(&self, id: Uuid) -> EduResult<&Course> {
    self.courses.get(&id).ok_or(EduError::NotFound("Course"))
  }

  pub fn lesson(&self, id: Uuid) -> EduResult<&Lesson> {
    self.lessons.get(&id).ok_or(EduError::NotFound("Lesson"))
  }

  pub fn quiz(&self, id: Uuid) -> EduResult<&Quiz> {
    self.quizzes.get(&id).ok_or(EduError::NotFound("Quiz"))
  }

  pub fn is_enrolled(&self, course_id: Uuid, student_email: &str) -> bool {
    self.enrollments.iter().any(|(c, s)| *c == course_id && s == student_email)
  }

  pub fn mastery_mut(&mut self, student_email: &str, subject: &str, topic: &str) -> Option<&mut MasteryRecord> {
    self.mastery.iter_mut().find(|m| m.matches(student_email, subject, topic))
  }

  pub fn attempts_by<'a>(&'a self, student_email: &'a str) -> impl Iterator<Item = &'a Attempt> + 'a {
    self.attempts.iter().filter(move |a| a.student_email == student_email)
  }

  /// Course an attempt belongs to, through its quiz and lesson.
  pub fn attempt_course(&self, attempt: &Attempt) -> Option<Uuid> {
    self.quizzes.get(&attempt.quiz_id).and_then(|q| self.lessons.get(&q.lesson_id)).map(|l| l.course_id)
  }

  /// Attempts first, then the quiz.
  pub fn remove_quiz(&mut self, quiz_id: Uuid) -> Option<Quiz> {
    self.attempts.retain(|a| a.quiz_id != quiz_id);
    self.quizzes.remove(&quiz_id)
  }

  /// Removes the course and everything hanging off it. Returns the number of
  /// quizzes removed.
  pub fn remove_course(&mut self, course_id: Uuid) -> usize {
    let lesson_ids: Vec<Uuid> = self.lessons.values().filter(|l| l.course_id == course_id).map(|l| l.id).collect();
    let quiz_ids: Vec<Uuid> = self.quizzes.values().filter(|q| lesson_ids.contains(&q.lesson_id)).map(|q| q.id).collect();
    for id in &quiz_ids {
      self.remove_quiz(*id);
    }
    self.lessons.retain(|_, l| l.course_id != course_id);
    self.enrollments.retain(|(c, _)| *c != course_id);
    self.courses.remove(&course_id);
    quiz_ids.len()
  }
}

pub struct Store {
  tables: RwLock<Tables>,
  snapshot: Option<PathBuf>,
}

impl Store {
  pub fn in_memory() -> Self {
    Self { tables: RwLock::new(Tables::default()), snapshot: None }
  }

  /// Load the snapshot at `path` if it exists; later commits write back to it.
  #[instrument(level = "info")]
  pub async fn open(path: &Path) -> EduResult<Self> {
    let tables = match tokio::fs::read_to_string(path).await {
      Ok(raw) => serde_json::from_str::<Tables>(&raw)
        .map_err(|e| EduError::Storage(format!("corrupt snapshot {}: {e}", path.display())))?,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
      Err(e) => return Err(EduError::Storage(format!("read {}: {e}", path.display()))),
    };
    info!(
      target: "store",
      path = %path.display(),
      courses = tables.courses.len(),
      quizzes = tables.quizzes.len(),
      attempts = tables.attempts.len(),
      "Store opened"
    );
    Ok(Self { tables: RwLock::new(tables), snapshot: Some(path.to_path_buf()) })
  }

  /// Run `f` against a consistent view of the tables.
  pub async fn read<T>(&self, f: impl FnOnce(&Tables) -> EduResult<T>) -> EduResult<T> {
    let guard = self.tables.read().await;
    f(&guard)
  }

  /// Apply `f` atomically: commit its changes only if it succeeds and the
  /// snapshot (if any) is written.
  pub async fn transact<T>(&self, f: impl FnOnce(&mut Tables) -> EduResult<T>) -> EduResult<T> {
    let mut guard = self.tables.write().await;
    let mut draft = guard.clone();
    let out = f(&mut draft)?;
    if let Some(path) = &self.snapshot {
      persist(path, &draft).await?;
    }
    *guard = draft;
    Ok(out)
  }
}

async fn persist(path: &Path, tables: &Tables) -> EduResult<()> {
  let raw = serde_json::to_vec(tables).map_err(|e| EduError::Storage(format!("serialize snapshot: {e}")))?;
  if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
    tokio::fs::create_dir_all(dir).await.map_err(|e| EduError::Storage(format!("create {}: {e}", dir.display())))?;
  }
  let tmp = path.with_extension("tmp");
  tokio::fs::write(&tmp, &raw).await.map_err(|e| EduError::Storage(format!("write {}: {e}", tmp.display())))?;
  tokio::fs::rename(&tmp, path).await.map_err(|e| EduError::Storage(format!("rename {}: {e}", path.display())))?;
  debug!(target: "store", bytes = raw.len(), "Snapshot written");
  Ok(())
}
