//! Core operations behind the HTTP handlers.
//!
//! This includes:
//!   - course/lesson bookkeeping needed to gate quizzes (ownership, enrollment)
//!   - quiz generation (keyword or model), manual quiz creation, listing, deletion
//!   - attempt submission: grading + mastery update as one store transaction
//!   - per-student read views and the teacher's per-course progress table

use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::attachments::{to_material, Material};
use crate::domain::{Attempt, Course, Lesson, MasteryRecord, Quiz, Role, User};
use crate::error::{EduError, EduResult};
use crate::identity::Identity;
use crate::protocol::*;
use crate::quiz::grading::{grade, next_mastery, round2};
use crate::quiz::keywords::generate_candidates;
use crate::quiz::model::{build_prompt, clamp_question_count, parse_model_reply, Blob, GenerationRequest, MAX_QUESTIONS};
use crate::quiz::normalize::{normalize_questions, validate_manual};
use crate::quiz::progress::{self, clamp_weeks};
use crate::state::AppState;
use crate::store::Tables;
use crate::util::normalize_email;

pub const DEFAULT_WEEKS: i64 = 8;
pub const WEAK_TOPIC_LIMIT: usize = 6;

// -------- Access rules --------

fn require_owner(course: &Course, who: &Identity) -> EduResult<()> {
  if course.teacher_email == who.email {
    Ok(())
  } else {
    Err(EduError::Forbidden("Not your course".into()))
  }
}

/// Owner teacher or enrolled student may read course content.
fn require_course_access(t: &Tables, course: &Course, who: &Identity) -> EduResult<()> {
  match who.role {
    Role::Teacher => require_owner(course, who),
    Role::Student if t.is_enrolled(course.id, &who.email) => Ok(()),
    Role::Student => Err(EduError::Forbidden("You are not enrolled in this course".into())),
    Role::Admin => Err(EduError::Forbidden("Forbidden".into())),
  }
}

/// Lesson + its course, with owner check.
fn owned_lesson(t: &Tables, lesson_id: Uuid, who: &Identity) -> EduResult<(Lesson, Course)> {
  let lesson = t.lesson(lesson_id)?;
  let course = t.course(lesson.course_id)?;
  require_owner(course, who)?;
  Ok((lesson.clone(), course.clone()))
}

/// Quiz → lesson → course chain.
fn quiz_chain(t: &Tables, quiz_id: Uuid) -> EduResult<(&Quiz, &Lesson, &Course)> {
  let quiz = t.quiz(quiz_id)?;
  let lesson = t.lesson(quiz.lesson_id)?;
  let course = t.course(lesson.course_id)?;
  Ok((quiz, lesson, course))
}

fn is_premium(t: &Tables, email: &str) -> bool {
  t.users.get(email).map_or(false, |u| u.is_premium(Utc::now()))
}

// -------- Courses & lessons --------

#[instrument(level = "info", skip(state, body), fields(who = %who.email))]
pub async fn create_course(state: &AppState, who: &Identity, body: CourseIn) -> EduResult<Course> {
  who.require_role(Role::Teacher)?;
  let (title, subject) = (body.title.trim().to_string(), body.subject.trim().to_string());
  if title.is_empty() || subject.is_empty() {
    return Err(EduError::Validation("Course title and subject are required".into()));
  }
  let course = Course { id: Uuid::new_v4(), title, subject, teacher_email: who.email.clone() };
  let out = course.clone();
  state.store.transact(move |t| {
    t.courses.insert(course.id, course);
    Ok(())
  }).await?;
  info!(target: "edumate_backend", course_id = %out.id, subject = %out.subject, "Course created");
  Ok(out)
}

#[instrument(level = "debug", skip(state), fields(who = %who.email))]
pub async fn my_courses(state: &AppState, who: &Identity) -> EduResult<Vec<Course>> {
  state.store.read(|t| {
    let mut courses: Vec<Course> = match who.role {
      Role::Teacher => t.courses.values().filter(|c| c.teacher_email == who.email).cloned().collect(),
      Role::Student => t.courses.values().filter(|c| t.is_enrolled(c.id, &who.email)).cloned().collect(),
      Role::Admin => Vec::new(),
    };
    courses.sort_by(|a, b| a.title.cmp(&b.title));
    Ok(courses)
  }).await
}

#[instrument(level = "info", skip(state), fields(who = %who.email, %course_id))]
pub async fn delete_course(state: &AppState, who: &Identity, course_id: Uuid) -> EduResult<()> {
  who.require_role(Role::Teacher)?;
  let removed_quizzes = state.store.transact(|t| {
    require_owner(t.course(course_id)?, who)?;
    Ok(t.remove_course(course_id))
  }).await?;
  info!(target: "edumate_backend", %course_id, removed_quizzes, "Course deleted");
  Ok(())
}

/// Returns true when the student was newly enrolled.
#[instrument(level = "info", skip(state, body), fields(who = %who.email, %course_id))]
pub async fn enroll_student(state: &AppState, who: &Identity, course_id: Uuid, body: EnrollIn) -> EduResult<(bool, String)> {
  who.require_role(Role::Teacher)?;
  let student = normalize_email(&body.student_email);
  if student.is_empty() {
    return Err(EduError::Validation("student_email is required".into()));
  }
  let s = student.clone();
  let added = state.store.transact(move |t| {
    require_owner(t.course(course_id)?, who)?;
    if t.is_enrolled(course_id, &s) {
      return Ok(false);
    }
    t.enrollments.push((course_id, s));
    Ok(true)
  }).await?;
  Ok((added, student))
}

#[instrument(level = "info", skip(state, body), fields(who = %who.email, course_id = %body.course_id))]
pub async fn create_lesson(state: &AppState, who: &Identity, body: LessonIn) -> EduResult<Lesson> {
  who.require_role(Role::Teacher)?;
  if body.title.trim().is_empty() || body.topic.trim().is_empty() {
    return Err(EduError::Validation("Lesson title and topic are required".into()));
  }
  let lesson = Lesson {
    id: Uuid::new_v4(),
    course_id: body.course_id,
    title: body.title.trim().to_string(),
    topic: body.topic.trim().to_string(),
    content_text: body.content_text,
    attachment: body.attachment,
    created_at: Utc::now(),
  };
  let out = lesson.clone();
  state.store.transact(move |t| {
    require_owner(t.course(lesson.course_id)?, who)?;
    t.lessons.insert(lesson.id, lesson);
    Ok(())
  }).await?;
  Ok(out)
}

#[instrument(level = "debug", skip(state), fields(who = %who.email, %course_id))]
pub async fn list_lessons(state: &AppState, who: &Identity, course_id: Uuid) -> EduResult<Vec<Lesson>> {
  state.store.read(|t| {
    require_course_access(t, t.course(course_id)?, who)?;
    let mut lessons: Vec<Lesson> = t.lessons.values().filter(|l| l.course_id == course_id).cloned().collect();
    lessons.sort_by_key(|l| l.created_at);
    Ok(lessons)
  }).await
}

// -------- Quizzes --------

/// Generate questions for a lesson and store them as a new quiz.
#[instrument(level = "info", skip(state, body), fields(who = %who.email, %lesson_id, requested = body.num_questions, source = ?body.source))]
pub async fn generate_quiz(state: &AppState, who: &Identity, lesson_id: Uuid, body: GenerateQuizIn) -> EduResult<(Quiz, QuizSource)> {
  who.require_role(Role::Teacher)?;
  let (lesson, premium) = state.store.read(|t| {
    let (lesson, _) = owned_lesson(t, lesson_id, who)?;
    Ok((lesson, is_premium(t, &who.email)))
  }).await?;

  let source = match body.source {
    QuizSource::Auto if state.generator.is_some() => QuizSource::Model,
    QuizSource::Auto => QuizSource::Keyword,
    explicit => explicit,
  };

  let questions = match source {
    QuizSource::Model => {
      let count = clamp_question_count(body.num_questions, premium);
      let candidates = generate_with_model(state, &lesson, &body.difficulty, count, premium).await?;
      normalize_questions(&candidates, count)?
    }
    _ => {
      let count = body.num_questions.clamp(1, MAX_QUESTIONS as i64) as usize;
      normalize_questions(&generate_candidates(&lesson.content_text, count), count)?
    }
  };

  let quiz = Quiz {
    id: Uuid::new_v4(),
    lesson_id,
    difficulty: body.difficulty,
    questions,
    created_at: Utc::now(),
  };
  let out = quiz.clone();
  state.store.transact(move |t| {
    t.lesson(quiz.lesson_id)?;
    t.quizzes.insert(quiz.id, quiz);
    Ok(())
  }).await?;

  info!(target: "quiz", quiz_id = %out.id, %lesson_id, ?source, questions = out.questions.len(), premium, "Quiz generated");
  Ok((out, source))
}

/// One model call; the reply is parsed but not yet normalized.
async fn generate_with_model(
  state: &AppState,
  lesson: &Lesson,
  difficulty: &str,
  count: usize,
  premium: bool,
) -> EduResult<Vec<serde_json::Value>> {
  let generator = state.generator.as_ref().ok_or(EduError::ServiceUnavailable)?;
  let prompts = &state.settings.prompts;

  let (prompt, blob): (String, Option<Blob>) = if !lesson.content_text.trim().is_empty() {
    (build_prompt(prompts, &lesson.content_text, difficulty, count), None)
  } else {
    let att = lesson.attachment.as_ref().ok_or(EduError::NoLessonContent)?;
    let raw = match state.attachments.read(&att.reference).await {
      Ok(raw) => raw,
      Err(EduError::NotFound(_)) => {
        warn!(target: "quiz", lesson_id = %lesson.id, reference = %att.reference, "Lesson attachment missing from storage");
        return Err(EduError::NoLessonContent);
      }
      Err(e) => return Err(e),
    };
    match to_material(att, raw)? {
      Material::Text(text) if !text.trim().is_empty() => (build_prompt(prompts, &text, difficulty, count), None),
      Material::Text(_) => return Err(EduError::NoLessonContent),
      Material::File(blob) => (build_prompt(prompts, "", difficulty, count), Some(blob)),
    }
  };

  let gemini = &state.settings.gemini;
  let max_output_tokens = if premium { gemini.premium_max_output_tokens } else { gemini.free_max_output_tokens };
  let req = GenerationRequest { prompt, blob, max_output_tokens, premium };

  let start = std::time::Instant::now();
  let reply = generator.generate(req).await?;
  info!(target: "quiz", generator = generator.name(), elapsed = ?start.elapsed(), reply_len = reply.len(), "Model reply received");

  parse_model_reply(&reply).map_err(|e| {
    warn!(target: "quiz", lesson_id = %lesson.id, reply_len = reply.len(), "Model reply is not a JSON array");
    e
  })
}

#[instrument(level = "info", skip(state, body), fields(who = %who.email, %lesson_id, questions = body.questions.len()))]
pub async fn create_manual_quiz(state: &AppState, who: &Identity, lesson_id: Uuid, body: ManualQuizIn) -> EduResult<Quiz> {
  who.require_role(Role::Teacher)?;
  state.store.transact(move |t| {
    owned_lesson(t, lesson_id, who)?;
    let questions = validate_manual(body.questions)?;
    let quiz = Quiz { id: Uuid::new_v4(), lesson_id, difficulty: body.difficulty, questions, created_at: Utc::now() };
    t.quizzes.insert(quiz.id, quiz.clone());
    Ok(quiz)
  }).await
}

#[instrument(level = "debug", skip(state), fields(who = %who.email, %lesson_id))]
pub async fn list_quizzes(state: &AppState, who: &Identity, lesson_id: Uuid) -> EduResult<Vec<QuizSummary>> {
  state.store.read(|t| {
    let lesson = t.lesson(lesson_id)?;
    require_course_access(t, t.course(lesson.course_id)?, who)?;
    let mut out: Vec<QuizSummary> = t
      .quizzes
      .values()
      .filter(|q| q.lesson_id == lesson_id)
      .map(|q| QuizSummary {
        quiz_id: q.id,
        difficulty: q.difficulty.clone(),
        created_at: q.created_at,
        question_count: q.questions.len(),
      })
      .collect();
    out.sort_by_key(|q| q.created_at);
    Ok(out)
  }).await
}

#[instrument(level = "debug", skip(state), fields(who = %who.email, %quiz_id))]
pub async fn get_quiz(state: &AppState, who: &Identity, quiz_id: Uuid) -> EduResult<Quiz> {
  state.store.read(|t| {
    let (quiz, _, course) = quiz_chain(t, quiz_id)?;
    require_course_access(t, course, who)?;
    Ok(quiz.clone())
  }).await
}

#[instrument(level = "info", skip(state), fields(who = %who.email, %quiz_id))]
pub async fn delete_quiz(state: &AppState, who: &Identity, quiz_id: Uuid) -> EduResult<()> {
  who.require_role(Role::Teacher)?;
  state.store.transact(|t| {
    let (_, _, course) = quiz_chain(t, quiz_id)?;
    require_owner(course, who)?;
    t.remove_quiz(quiz_id);
    Ok(())
  }).await?;
  info!(target: "quiz", %quiz_id, "Quiz deleted with its attempts");
  Ok(())
}

// -------- Attempts & mastery --------

/// Grade a submission, record the attempt and update mastery, all or nothing.
#[instrument(level = "info", skip(state, answers), fields(who = %who.email, %quiz_id, answers = answers.len()))]
pub async fn submit_attempt(state: &AppState, who: &Identity, quiz_id: Uuid, answers: Vec<String>) -> EduResult<AttemptOut> {
  who.require_role(Role::Student)?;
  let out = state.store.transact(|t| {
    let (quiz, lesson, course) = quiz_chain(t, quiz_id)?;
    if !t.is_enrolled(course.id, &who.email) {
      return Err(EduError::Forbidden("You are not enrolled in this course".into()));
    }
    let graded = grade(&quiz.questions, &answers)?;
    let (subject, topic) = (course.subject.clone(), lesson.topic.clone());
    let now = Utc::now();

    let attempt = Attempt {
      id: Uuid::new_v4(),
      quiz_id,
      student_email: who.email.clone(),
      answers,
      score: graded.score,
      submitted_at: now,
    };
    let attempt_id = attempt.id;
    t.attempts.push(attempt);

    let mastery = match t.mastery_mut(&who.email, &subject, &topic) {
      Some(rec) => {
        rec.score = next_mastery(Some(rec.score), graded.score);
        rec.updated_at = now;
        rec.score
      }
      None => {
        let score = next_mastery(None, graded.score);
        t.mastery.push(MasteryRecord {
          student_email: who.email.clone(),
          subject: subject.clone(),
          topic: topic.clone(),
          score,
          updated_at: now,
        });
        score
      }
    };

    Ok(AttemptOut {
      attempt_id,
      quiz_id,
      score: round2(graded.score),
      subject,
      topic,
      mastery: round2(mastery),
      details: graded.details,
    })
  }).await?;

  info!(target: "grading", %quiz_id, attempt_id = %out.attempt_id, score = out.score, mastery = out.mastery, "Attempt recorded");
  Ok(out)
}

#[instrument(level = "debug", skip(state), fields(who = %who.email))]
pub async fn student_stats(state: &AppState, who: &Identity) -> EduResult<progress::StudentStats> {
  who.require_role(Role::Student)?;
  state.store.read(|t| Ok(progress::student_stats(t.attempts_by(&who.email)))).await
}

#[instrument(level = "debug", skip(state), fields(who = %who.email))]
pub async fn weekly_progress(state: &AppState, who: &Identity, weeks: Option<i64>) -> EduResult<Vec<progress::WeekBucket>> {
  who.require_role(Role::Student)?;
  let weeks = clamp_weeks(weeks.unwrap_or(DEFAULT_WEEKS));
  state.store.read(|t| Ok(progress::weekly_progress(t.attempts_by(&who.email), weeks, Utc::now()))).await
}

#[instrument(level = "debug", skip(state), fields(who = %who.email))]
pub async fn topic_report(state: &AppState, who: &Identity) -> EduResult<progress::TopicReport> {
  who.require_role(Role::Student)?;
  state.store.read(|t| {
    Ok(progress::topic_report(t.mastery.iter().filter(|m| m.student_email == who.email)))
  }).await
}

/// Per enrolled student: attempts on this course's quizzes, average, latest.
/// Sorted by average (best first), then email.
#[instrument(level = "debug", skip(state), fields(who = %who.email, %course_id))]
pub async fn course_progress(state: &AppState, who: &Identity, course_id: Uuid) -> EduResult<Vec<StudentProgress>> {
  who.require_role(Role::Teacher)?;
  state.store.read(|t| {
    require_owner(t.course(course_id)?, who)?;

    let mut rows: HashMap<&str, (usize, f64, Option<chrono::DateTime<Utc>>)> = t
      .enrollments
      .iter()
      .filter(|(c, _)| *c == course_id)
      .map(|(_, s)| (s.as_str(), (0, 0.0, None)))
      .collect();

    for a in t.attempts.iter().filter(|a| t.attempt_course(a) == Some(course_id)) {
      if let Some(row) = rows.get_mut(a.student_email.as_str()) {
        row.0 += 1;
        row.1 += a.score;
        if row.2.map_or(true, |last| a.submitted_at > last) {
          row.2 = Some(a.submitted_at);
        }
      }
    }

    let mut students: Vec<StudentProgress> = rows
      .into_iter()
      .map(|(email, (n, sum, last))| StudentProgress {
        student_email: email.to_string(),
        quizzes_done: n,
        avg_score: if n == 0 { 0.0 } else { round2(sum / n as f64) },
        last_attempt_at: last,
      })
      .collect();
    students.sort_by(|a, b| b.avg_score.total_cmp(&a.avg_score).then_with(|| a.student_email.cmp(&b.student_email)));
    Ok(students)
  }).await
}

/// Owner check, then the student must be enrolled in that course.
fn owned_course_student(t: &Tables, course_id: Uuid, student: &str, who: &Identity) -> EduResult<()> {
  require_owner(t.course(course_id)?, who)?;
  if t.is_enrolled(course_id, student) {
    Ok(())
  } else {
    Err(EduError::NotFound("Enrolled student"))
  }
}

/// Weekly series for one student, counting only attempts on this course's quizzes.
#[instrument(level = "debug", skip(state), fields(who = %who.email, %course_id))]
pub async fn student_course_weekly(
  state: &AppState,
  who: &Identity,
  course_id: Uuid,
  student_email: &str,
  weeks: Option<i64>,
) -> EduResult<(String, Vec<progress::WeekBucket>)> {
  who.require_role(Role::Teacher)?;
  let student = normalize_email(student_email);
  let weeks = clamp_weeks(weeks.unwrap_or(DEFAULT_WEEKS));
  let series = state.store.read(|t| {
    owned_course_student(t, course_id, &student, who)?;
    let attempts = t.attempts_by(&student).filter(|a| t.attempt_course(a) == Some(course_id));
    Ok(progress::weekly_progress(attempts, weeks, Utc::now()))
  }).await?;
  Ok((student, series))
}

/// The student's lowest mastery rows, weakest first.
#[instrument(level = "debug", skip(state), fields(who = %who.email, %course_id))]
pub async fn student_weak_topics(
  state: &AppState,
  who: &Identity,
  course_id: Uuid,
  student_email: &str,
) -> EduResult<(String, Vec<progress::TopicMastery>)> {
  who.require_role(Role::Teacher)?;
  let student = normalize_email(student_email);
  let rows = state.store.read(|t| {
    owned_course_student(t, course_id, &student, who)?;
    let mut rows: Vec<progress::TopicMastery> = t
      .mastery
      .iter()
      .filter(|m| m.student_email == student)
      .map(|m| progress::TopicMastery { subject: m.subject.clone(), topic: m.topic.clone(), mastery: m.score })
      .collect();
    rows.sort_by(|a, b| a.mastery.total_cmp(&b.mastery));
    rows.truncate(WEAK_TOPIC_LIMIT);
    Ok(rows)
  }).await?;
  Ok((student, rows))
}

// -------- Plans --------

#[instrument(level = "info", skip(state, body), fields(who = %who.email, plan = ?body.plan))]
pub async fn set_plan(state: &AppState, who: &Identity, email: &str, body: PlanIn) -> EduResult<User> {
  if who.role != Role::Admin {
    return Err(EduError::Forbidden("Forbidden: admin only".into()));
  }
  let email = normalize_email(email);
  if email.is_empty() {
    return Err(EduError::Validation("email is required".into()));
  }
  let user = User { email: email.clone(), plan: body.plan, premium_until: body.premium_until };
  let out = user.clone();
  state.store.transact(move |t| {
    t.users.insert(email, user);
    Ok(())
  }).await?;
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::{Arc, Mutex};

  use async_trait::async_trait;

  use crate::config::Settings;
  use crate::domain::{Attachment, Plan, Question, EXPLANATION_PLACEHOLDER};
  use crate::quiz::model::TextGenerator;

  /// Canned replies; records every request it sees.
  struct FakeModel {
    reply: EduResult<String>,
    calls: AtomicUsize,
    seen: Mutex<Vec<GenerationRequest>>,
  }

  impl FakeModel {
    fn replying(text: &str) -> Arc<Self> {
      Arc::new(Self { reply: Ok(text.into()), calls: AtomicUsize::new(0), seen: Mutex::new(vec![]) })
    }
    fn failing() -> Arc<Self> {
      Arc::new(Self {
        reply: Err(EduError::ExternalService("HTTP 500".into())),
        calls: AtomicUsize::new(0),
        seen: Mutex::new(vec![]),
      })
    }
  }

  #[async_trait]
  impl TextGenerator for FakeModel {
    fn name(&self) -> &str {
      "fake"
    }

    async fn generate(&self, req: GenerationRequest) -> EduResult<String> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.seen.lock().unwrap().push(req);
      match &self.reply {
        Ok(s) => Ok(s.clone()),
        Err(e) => Err(EduError::ExternalService(e.to_string())),
      }
    }
  }

  fn teacher() -> Identity {
    Identity { email: "t@school.org".into(), role: Role::Teacher }
  }
  fn other_teacher() -> Identity {
    Identity { email: "x@school.org".into(), role: Role::Teacher }
  }
  fn student() -> Identity {
    Identity { email: "s@school.org".into(), role: Role::Student }
  }

  fn state_with(model: Option<Arc<FakeModel>>) -> AppState {
    AppState::with_generator(Settings::default(), model.map(|m| m as Arc<dyn TextGenerator>))
  }

  /// Course "Biology" with lesson topic "Cells", student enrolled.
  async fn seed(state: &AppState, content: &str) -> (Course, Lesson) {
    let course = create_course(state, &teacher(), CourseIn { title: "Bio 101".into(), subject: "Biology".into() })
      .await
      .unwrap();
    enroll_student(state, &teacher(), course.id, EnrollIn { student_email: "S@School.org".into() }).await.unwrap();
    let lesson = create_lesson(
      state,
      &teacher(),
      LessonIn {
        course_id: course.id,
        title: "Cells".into(),
        topic: "Cells".into(),
        content_text: content.into(),
        attachment: None,
      },
    )
    .await
    .unwrap();
    (course, lesson)
  }

  fn mcq(answer: &str) -> Question {
    Question {
      text: format!("Pick {answer}"),
      options: vec![answer.into(), "o1".into(), "o2".into(), "o3".into()],
      answer: answer.into(),
      explanation: String::new(),
    }
  }

  async fn manual_quiz(state: &AppState, lesson: &Lesson, answers: &[&str]) -> Quiz {
    let questions = answers.iter().map(|a| mcq(a)).collect();
    create_manual_quiz(state, &teacher(), lesson.id, ManualQuizIn { difficulty: "easy".into(), questions })
      .await
      .unwrap()
  }

  #[tokio::test]
  async fn keyword_generation_without_model() {
    let state = state_with(None);
    let (_, lesson) = seed(&state, "Mitochondria produce energy through respiration inside every cell").await;
    let (quiz, source) = generate_quiz(&state, &teacher(), lesson.id, GenerateQuizIn { num_questions: 4, ..Default::default() })
      .await
      .unwrap();
    assert_eq!(source, QuizSource::Keyword);
    assert_eq!(quiz.questions.len(), 4);
    assert!(quiz.questions.iter().all(|q| q.options.len() == 4 && q.options.contains(&q.answer)));
  }

  #[tokio::test]
  async fn model_mode_without_model_is_unavailable() {
    let state = state_with(None);
    let (_, lesson) = seed(&state, "text").await;
    let req = GenerateQuizIn { source: QuizSource::Model, ..Default::default() };
    assert!(matches!(generate_quiz(&state, &teacher(), lesson.id, req).await, Err(EduError::ServiceUnavailable)));
  }

  #[tokio::test]
  async fn model_generation_normalizes_reply_and_clamps_free_plan() {
    let reply = r#"```json
      [{"question":"What makes ATP?","options":["Mitochondria","Ribosome"],"answer":"mitochondria"},
       {"options":["a"]}]
    ```"#;
    let model = FakeModel::replying(reply);
    let state = state_with(Some(model.clone()));
    let (_, lesson) = seed(&state, "Cells and energy").await;

    let (quiz, source) = generate_quiz(&state, &teacher(), lesson.id, GenerateQuizIn { num_questions: 15, ..Default::default() })
      .await
      .unwrap();
    assert_eq!(source, QuizSource::Model);
    assert_eq!(quiz.questions.len(), 1);
    let q = &quiz.questions[0];
    assert_eq!(q.answer, "Mitochondria");
    assert_eq!(q.options[2], "None of the above");
    assert_eq!(q.explanation, EXPLANATION_PLACEHOLDER);

    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    let seen = model.seen.lock().unwrap();
    assert!(!seen[0].premium);
    assert!(seen[0].prompt.contains("exactly 10"));
    assert_eq!(seen[0].max_output_tokens, 1024);
  }

  #[tokio::test]
  async fn premium_teacher_gets_larger_quota() {
    let model = FakeModel::replying(r#"[{"question":"Q","options":["a","b","c","d"],"answer":"a"}]"#);
    let state = state_with(Some(model.clone()));
    let (_, lesson) = seed(&state, "Cells").await;
    let admin = Identity { email: "root@school.org".into(), role: Role::Admin };
    set_plan(&state, &admin, "T@school.org", PlanIn { plan: Plan::Premium, premium_until: None }).await.unwrap();

    generate_quiz(&state, &teacher(), lesson.id, GenerateQuizIn { num_questions: 15, ..Default::default() }).await.unwrap();
    let seen = model.seen.lock().unwrap();
    assert!(seen[0].premium);
    assert!(seen[0].prompt.contains("exactly 15"));
    assert_eq!(seen[0].max_output_tokens, 2048);
  }

  #[tokio::test]
  async fn no_content_fails_before_calling_model() {
    let model = FakeModel::replying("[]");
    let state = state_with(Some(model.clone()));
    let (_, lesson) = seed(&state, "   ").await;
    let res = generate_quiz(&state, &teacher(), lesson.id, GenerateQuizIn::default()).await;
    assert!(matches!(res, Err(EduError::NoLessonContent)));

    // attachment that does not resolve counts as no content too
    let state2 = state_with(Some(model.clone()));
    let (course, _) = seed(&state2, "x").await;
    let lesson = create_lesson(&state2, &teacher(), LessonIn {
      course_id: course.id,
      title: "Scan".into(),
      topic: "Cells".into(),
      content_text: String::new(),
      attachment: Some(Attachment { reference: "nope.pdf".into(), name: None, mime_type: None }),
    }).await.unwrap();
    let res = generate_quiz(&state2, &teacher(), lesson.id, GenerateQuizIn::default()).await;
    assert!(matches!(res, Err(EduError::NoLessonContent)));

    assert_eq!(model.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn attachment_blob_is_sent_with_prompt() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("slides.pdf"), b"%PDF-1.4").unwrap();
    let model = FakeModel::replying(r#"[{"question":"Q","options":["a","b","c","d"],"answer":"d"}]"#);
    let mut settings = Settings::default();
    settings.storage.upload_dir = dir.path().to_path_buf();
    let state = AppState::with_generator(settings, Some(model.clone() as Arc<dyn TextGenerator>));

    let (course, _) = seed(&state, "x").await;
    let lesson = create_lesson(&state, &teacher(), LessonIn {
      course_id: course.id,
      title: "Slides".into(),
      topic: "Cells".into(),
      content_text: String::new(),
      attachment: Some(Attachment { reference: "slides.pdf".into(), name: None, mime_type: None }),
    }).await.unwrap();

    let (quiz, _) = generate_quiz(&state, &teacher(), lesson.id, GenerateQuizIn::default()).await.unwrap();
    assert_eq!(quiz.questions[0].answer, "d");
    let seen = model.seen.lock().unwrap();
    let blob = seen[0].blob.as_ref().unwrap();
    assert_eq!(blob.mime_type, "application/pdf");
    assert_eq!(blob.data, b"%PDF-1.4");
  }

  #[tokio::test]
  async fn model_failures_surface_without_retry_or_fallback() {
    let model = FakeModel::failing();
    let state = state_with(Some(model.clone()));
    let (_, lesson) = seed(&state, "Cells").await;
    let res = generate_quiz(&state, &teacher(), lesson.id, GenerateQuizIn::default()).await;
    assert!(matches!(res, Err(EduError::ExternalService(_))));
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);

    let garbled = FakeModel::replying("I cannot help with that.");
    let state = state_with(Some(garbled));
    let (_, lesson) = seed(&state, "Cells").await;
    let res = generate_quiz(&state, &teacher(), lesson.id, GenerateQuizIn::default()).await;
    assert!(matches!(res, Err(EduError::UnparsableModelReply)));

    let empty = FakeModel::replying(r#"[{"options":["a"]}]"#);
    let state = state_with(Some(empty));
    let (_, lesson) = seed(&state, "Cells").await;
    let res = generate_quiz(&state, &teacher(), lesson.id, GenerateQuizIn::default()).await;
    assert!(matches!(res, Err(EduError::NoValidQuestions)));
    let stored = state.store.read(|t| Ok(t.quizzes.len())).await.unwrap();
    assert_eq!(stored, 0);
  }

  #[tokio::test]
  async fn only_owner_manages_quizzes() {
    let state = state_with(None);
    let (_, lesson) = seed(&state, "Cells").await;
    let res = generate_quiz(&state, &other_teacher(), lesson.id, GenerateQuizIn::default()).await;
    assert!(matches!(res, Err(EduError::Forbidden(_))));
    let res = generate_quiz(&state, &student(), lesson.id, GenerateQuizIn::default()).await;
    assert!(matches!(res, Err(EduError::Forbidden(_))));

    let quiz = manual_quiz(&state, &lesson, &["a"]).await;
    assert!(matches!(delete_quiz(&state, &other_teacher(), quiz.id).await, Err(EduError::Forbidden(_))));
    assert!(matches!(get_quiz(&state, &other_teacher(), quiz.id).await, Err(EduError::Forbidden(_))));
    assert!(matches!(get_quiz(&state, &teacher(), Uuid::new_v4()).await, Err(EduError::NotFound("Quiz"))));
  }

  #[tokio::test]
  async fn invalid_manual_quiz_saves_nothing() {
    let state = state_with(None);
    let (_, lesson) = seed(&state, "Cells").await;
    let mut bad = mcq("b");
    bad.answer = "zzz".into();
    let res = create_manual_quiz(&state, &teacher(), lesson.id, ManualQuizIn { difficulty: "hard".into(), questions: vec![mcq("a"), bad] }).await;
    assert!(matches!(res, Err(EduError::Validation(_))));
    assert!(list_quizzes(&state, &teacher(), lesson.id).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn manual_quiz_checks_access_before_questions() {
    let state = state_with(None);
    let (_, lesson) = seed(&state, "Cells").await;
    let bad = || ManualQuizIn { difficulty: "easy".into(), questions: vec![] };

    let res = create_manual_quiz(&state, &other_teacher(), lesson.id, bad()).await;
    assert!(matches!(res, Err(EduError::Forbidden(_))));
    let res = create_manual_quiz(&state, &teacher(), Uuid::new_v4(), bad()).await;
    assert!(matches!(res, Err(EduError::NotFound("Lesson"))));
    let res = create_manual_quiz(&state, &teacher(), lesson.id, bad()).await;
    assert!(matches!(res, Err(EduError::Validation(_))));
  }

  #[tokio::test]
  async fn enrolled_student_lists_and_reads_quizzes() {
    let state = state_with(None);
    let (_, lesson) = seed(&state, "Cells").await;
    let quiz = manual_quiz(&state, &lesson, &["a", "b", "c"]).await;

    let list = list_quizzes(&state, &student(), lesson.id).await.unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].question_count, 3);
    assert_eq!(get_quiz(&state, &student(), quiz.id).await.unwrap().questions.len(), 3);

    let stranger = Identity { email: "z@school.org".into(), role: Role::Student };
    assert!(matches!(list_quizzes(&state, &stranger, lesson.id).await, Err(EduError::Forbidden(_))));
  }

  #[tokio::test]
  async fn submission_grades_and_tracks_mastery() {
    let state = state_with(None);
    let (_, lesson) = seed(&state, "Cells").await;
    let quiz = manual_quiz(&state, &lesson, &["X", "Y"]).await;

    let first = submit_attempt(&state, &student(), quiz.id, vec!["X".into(), "Z".into()]).await.unwrap();
    assert_eq!(first.score, 50.0);
    assert!(first.details[0].is_correct);
    assert!(!first.details[1].is_correct);
    assert_eq!((first.subject.as_str(), first.topic.as_str()), ("Biology", "Cells"));
    assert_eq!(first.mastery, 50.0);

    let second = submit_attempt(&state, &student(), quiz.id, vec!["X".into(), "Y".into()]).await.unwrap();
    assert_eq!(second.score, 100.0);
    assert!((second.mastery - 65.0).abs() < 1e-9);

    let (attempts, mastery_rows) = state.store.read(|t| Ok((t.attempts.len(), t.mastery.len()))).await.unwrap();
    assert_eq!(attempts, 2);
    assert_eq!(mastery_rows, 1);
  }

  #[tokio::test]
  async fn mismatched_submission_writes_nothing() {
    let state = state_with(None);
    let (_, lesson) = seed(&state, "Cells").await;
    let quiz = manual_quiz(&state, &lesson, &["a", "b", "c"]).await;

    let res = submit_attempt(&state, &student(), quiz.id, vec!["a".into(), "b".into()]).await;
    assert!(matches!(res, Err(EduError::AnswerCountMismatch { expected: 3, got: 2 })));
    let (attempts, mastery) = state.store.read(|t| Ok((t.attempts.len(), t.mastery.len()))).await.unwrap();
    assert_eq!((attempts, mastery), (0, 0));
  }

  #[tokio::test]
  async fn unenrolled_or_non_student_cannot_submit() {
    let state = state_with(None);
    let (_, lesson) = seed(&state, "Cells").await;
    let quiz = manual_quiz(&state, &lesson, &["a"]).await;
    let stranger = Identity { email: "z@school.org".into(), role: Role::Student };
    assert!(matches!(submit_attempt(&state, &stranger, quiz.id, vec!["a".into()]).await, Err(EduError::Forbidden(_))));
    assert!(matches!(submit_attempt(&state, &teacher(), quiz.id, vec!["a".into()]).await, Err(EduError::Forbidden(_))));
    assert!(matches!(submit_attempt(&state, &student(), Uuid::new_v4(), vec![]).await, Err(EduError::NotFound("Quiz"))));
  }

  #[tokio::test]
  async fn deleting_quiz_removes_attempts_but_keeps_mastery() {
    let state = state_with(None);
    let (_, lesson) = seed(&state, "Cells").await;
    let quiz = manual_quiz(&state, &lesson, &["a"]).await;
    submit_attempt(&state, &student(), quiz.id, vec!["a".into()]).await.unwrap();

    delete_quiz(&state, &teacher(), quiz.id).await.unwrap();
    let (quizzes, attempts, mastery) = state.store.read(|t| Ok((t.quizzes.len(), t.attempts.len(), t.mastery.len()))).await.unwrap();
    assert_eq!((quizzes, attempts, mastery), (0, 0, 1));
  }

  #[tokio::test]
  async fn concurrent_submissions_all_land_in_mastery() {
    let state = Arc::new(state_with(None));
    let (_, lesson) = seed(&state, "Cells").await;
    let quiz_id = manual_quiz(&state, &lesson, &["a"]).await.id;

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let state = state.clone();
        tokio::spawn(async move { submit_attempt(&state, &student(), quiz_id, vec!["a".into()]).await })
      })
      .collect();
    for h in handles {
      h.await.unwrap().unwrap();
    }
    let (attempts, mastery) = state.store.read(|t| Ok((t.attempts.len(), t.mastery[0].score))).await.unwrap();
    assert_eq!(attempts, 8);
    assert!((mastery - 100.0).abs() < 1e-9);
  }

  #[tokio::test]
  async fn student_views_reflect_attempts() {
    let state = state_with(None);
    let (_, lesson) = seed(&state, "Cells").await;
    let quiz = manual_quiz(&state, &lesson, &["a", "b", "c", "d"]).await;
    submit_attempt(&state, &student(), quiz.id, vec!["a".into(), "b".into(), "c".into(), "d".into()]).await.unwrap();
    submit_attempt(&state, &student(), quiz.id, vec!["a".into(), "x".into(), "x".into(), "x".into()]).await.unwrap();

    let stats = student_stats(&state, &student()).await.unwrap();
    assert_eq!(stats.total_attempts, 2);
    assert_eq!(stats.avg_score, 62.5);
    assert_eq!(stats.streak_days, 1);

    let weeks = weekly_progress(&state, &student(), Some(3)).await.unwrap();
    assert_eq!(weeks.len(), 3);
    assert_eq!(weeks[2].attempts, 2);

    // 100 then 0.7*100 + 0.3*25 = 77.5
    let report = topic_report(&state, &student()).await.unwrap();
    assert_eq!(report.strong_topics.len(), 1);
    assert!((report.strong_topics[0].mastery - 77.5).abs() < 1e-9);
  }

  #[tokio::test]
  async fn teacher_sees_course_progress() {
    let state = state_with(None);
    let (course, lesson) = seed(&state, "Cells").await;
    enroll_student(&state, &teacher(), course.id, EnrollIn { student_email: "idle@school.org".into() }).await.unwrap();
    let quiz = manual_quiz(&state, &lesson, &["a", "b"]).await;
    submit_attempt(&state, &student(), quiz.id, vec!["a".into(), "x".into()]).await.unwrap();

    let rows = course_progress(&state, &teacher(), course.id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].student_email, "s@school.org");
    assert_eq!(rows[0].quizzes_done, 1);
    assert_eq!(rows[0].avg_score, 50.0);
    assert_eq!(rows[1].quizzes_done, 0);
    assert!(rows[1].last_attempt_at.is_none());

    assert!(matches!(course_progress(&state, &other_teacher(), course.id).await, Err(EduError::Forbidden(_))));
  }

  #[tokio::test]
  async fn teacher_weekly_view_counts_only_this_course() {
    let state = state_with(None);
    let (course, lesson) = seed(&state, "Cells").await;
    let (_, other_lesson) = seed(&state, "Plants").await;
    let here = manual_quiz(&state, &lesson, &["a"]).await;
    let elsewhere = manual_quiz(&state, &other_lesson, &["a"]).await;
    submit_attempt(&state, &student(), here.id, vec!["a".into()]).await.unwrap();
    submit_attempt(&state, &student(), elsewhere.id, vec!["b".into()]).await.unwrap();

    let (email, series) = student_course_weekly(&state, &teacher(), course.id, "S@school.org", Some(2)).await.unwrap();
    assert_eq!(email, "s@school.org");
    assert_eq!(series.len(), 2);
    assert_eq!(series[1].attempts, 1);
    assert_eq!(series[1].avg_score, 100.0);

    let res = student_course_weekly(&state, &teacher(), course.id, "z@school.org", None).await;
    assert!(matches!(res, Err(EduError::NotFound(_))));
    let res = student_course_weekly(&state, &other_teacher(), course.id, "s@school.org", None).await;
    assert!(matches!(res, Err(EduError::Forbidden(_))));
  }

  #[tokio::test]
  async fn weak_topics_are_lowest_six_ascending() {
    let state = state_with(None);
    let (course, _) = seed(&state, "Cells").await;
    state
      .store
      .transact(|t| {
        for (i, score) in [90.0, 10.0, 55.0, 30.0, 70.0, 20.0, 40.0].into_iter().enumerate() {
          t.mastery.push(MasteryRecord {
            student_email: "s@school.org".into(),
            subject: "Biology".into(),
            topic: format!("T{i}"),
            score,
            updated_at: Utc::now(),
          });
        }
        Ok(())
      })
      .await
      .unwrap();

    let (_, rows) = student_weak_topics(&state, &teacher(), course.id, "s@school.org").await.unwrap();
    let scores: Vec<f64> = rows.iter().map(|r| r.mastery).collect();
    assert_eq!(scores, vec![10.0, 20.0, 30.0, 40.0, 55.0, 70.0]);

    let res = student_weak_topics(&state, &teacher(), course.id, "z@school.org").await;
    assert!(matches!(res, Err(EduError::NotFound("Enrolled student"))));
  }

  #[tokio::test]
  async fn deleting_course_cascades() {
    let state = state_with(None);
    let (course, lesson) = seed(&state, "Cells").await;
    let quiz = manual_quiz(&state, &lesson, &["a"]).await;
    submit_attempt(&state, &student(), quiz.id, vec!["a".into()]).await.unwrap();

    delete_course(&state, &teacher(), course.id).await.unwrap();
    let counts = state
      .store
      .read(|t| Ok((t.courses.len(), t.lessons.len(), t.quizzes.len(), t.attempts.len(), t.enrollments.len())))
      .await
      .unwrap();
    assert_eq!(counts, (0, 0, 0, 0, 0));
  }

  #[tokio::test]
  async fn enrollment_is_idempotent_and_courses_listed_by_role() {
    let state = state_with(None);
    let (course, _) = seed(&state, "Cells").await;
    let (added, email) = enroll_student(&state, &teacher(), course.id, EnrollIn { student_email: " s@SCHOOL.org".into() })
      .await
      .unwrap();
    assert!(!added);
    assert_eq!(email, "s@school.org");

    assert_eq!(my_courses(&state, &student()).await.unwrap().len(), 1);
    assert_eq!(my_courses(&state, &teacher()).await.unwrap().len(), 1);
    assert!(my_courses(&state, &other_teacher()).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn only_admin_sets_plans() {
    let state = state_with(None);
    let res = set_plan(&state, &teacher(), "t@school.org", PlanIn { plan: Plan::Premium, premium_until: None }).await;
    assert!(matches!(res, Err(EduError::Forbidden(_))));
  }
}
