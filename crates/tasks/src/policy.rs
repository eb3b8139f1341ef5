// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Decide what happens to a single candidate, and do it.
//!
//! Every mutation goes through [`DeletionPolicy::evaluate_and_act`], runs in
//! its own transaction, and is verified afterwards with a fresh one. Errors
//! never escape from here: they become a skipped or failed [`Outcome`].

use std::{collections::BTreeMap, fmt, str::FromStr};

use janitor_data_model::{Question, QuestionCategory, QuestionUsageInfo};
use janitor_storage::{
    RepositoryAccess, RepositoryError,
    qtype::{OPTIONS_TABLES, SatelliteRecord, SatelliteTable},
};
use thiserror::Error;

use crate::State;

/// What to do with the candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Only count them
    Report,

    /// Delete them
    Delete,

    /// Repair them, when possible
    Fix,
}

impl Mode {
    /// The name of the mode, as accepted on the command line
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Delete => "delete",
            Self::Fix => "fix",
        }
    }

    /// How the successfully handled candidates are called in summaries
    #[must_use]
    pub const fn done_label(self) -> &'static str {
        match self {
            Self::Report => "Found",
            Self::Delete => "Deleted",
            Self::Fix => "Fixed",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("invalid action {0:?}, expected one of report, delete or fix")]
pub struct InvalidMode(String);

impl FromStr for Mode {
    type Err = InvalidMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "report" => Ok(Self::Report),
            "delete" => Ok(Self::Delete),
            "fix" => Ok(Self::Fix),
            other => Err(InvalidMode(other.to_owned())),
        }
    }
}

/// Why a candidate was kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The question is used by an attempt outside of a preview
    Used(Option<QuestionUsageInfo>),

    /// The category still has questions
    HasQuestions(usize),

    /// The category is the parent of other categories
    HasSubcategories(usize),

    /// The category is the root of its context
    Protected,

    /// The store accepted the delete, but the row is still there
    StillPresent,

    /// The store failed
    Error(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Used(_) => f.write_str("used in quiz attempts"),
            Self::HasQuestions(count) => write!(f, "has {count} questions"),
            Self::HasSubcategories(count) => write!(f, "has {count} subcategories"),
            Self::Protected => f.write_str("top category"),
            Self::StillPresent => f.write_str("deletion failed - still present after delete"),
            Self::Error(error) => write!(f, "error: {error}"),
        }
    }
}

/// What happened to a candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Deleted,
    Skipped(SkipReason),
    Fixed,
    Failed(String),
}

impl Outcome {
    fn skipped_on_error(error: &RepositoryError) -> Self {
        Self::Skipped(SkipReason::Error(error.to_string()))
    }
}

/// Something the policy can act on
#[derive(Debug, Clone, Copy)]
pub enum Candidate<'a> {
    /// A question already known to be deletable, like an unused one
    Question(&'a Question),

    /// A non-surviving member of a group of questions with the same name
    DuplicateQuestion(&'a Question),

    /// A category, which is only deleted when empty
    Category(&'a QuestionCategory),

    /// A question without its type-specific options
    MissingOptions(&'a Question),

    /// A question without any answer
    MissingAnswers(&'a Question),
}

impl Candidate<'_> {
    fn issue(&self) -> String {
        match self {
            Self::Question(question) | Self::DuplicateQuestion(question) => {
                format!("question {} could be deleted", question.id)
            }
            Self::Category(category) => format!("category {} could be deleted", category.id),
            Self::MissingOptions(question) => {
                format!("{} question {} has no options", question.qtype, question.id)
            }
            Self::MissingAnswers(question) => {
                format!("{} question {} has no answers", question.qtype, question.id)
            }
        }
    }
}

/// Builds the default options of a question type, from a record with only
/// the question set
pub type OptionsBuilder = fn(SatelliteRecord) -> SatelliteRecord;

/// Maps a question type to its options table, and to the defaults used to
/// repair a question missing its options
#[derive(Clone)]
pub struct DefaultsRegistry {
    builders: BTreeMap<&'static str, (SatelliteTable, OptionsBuilder)>,
}

impl Default for DefaultsRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for (qtype, table) in OPTIONS_TABLES {
            if let Some(builder) = default_builder(qtype) {
                registry.register(qtype, *table, builder);
            }
        }
        registry
    }
}

impl DefaultsRegistry {
    /// A registry without any question type
    #[must_use]
    pub fn empty() -> Self {
        Self {
            builders: BTreeMap::new(),
        }
    }

    /// Register a question type, replacing any previous registration
    pub fn register(&mut self, qtype: &'static str, table: SatelliteTable, builder: OptionsBuilder) {
        self.builders.insert(qtype, (table, builder));
    }

    /// The options table of a question type
    #[must_use]
    pub fn table(&self, qtype: &str) -> Option<SatelliteTable> {
        self.builders.get(qtype).map(|(table, _)| *table)
    }

    /// The registered question types with their options table
    pub fn qtypes(&self) -> impl Iterator<Item = (&'static str, SatelliteTable)> + '_ {
        self.builders.iter().map(|(qtype, (table, _))| (*qtype, *table))
    }

    /// Build the default options of a question, if its type is known
    #[must_use]
    pub fn build(&self, question: &Question) -> Option<SatelliteRecord> {
        let (table, builder) = self.builders.get(question.qtype.as_str())?;
        Some(builder(SatelliteRecord::new(*table, question.id)))
    }
}

fn default_builder(qtype: &str) -> Option<OptionsBuilder> {
    let builder: OptionsBuilder = match qtype {
        "multichoice" => multichoice_defaults,
        "truefalse" => truefalse_defaults,
        "shortanswer" => shortanswer_defaults,
        "numerical" => numerical_defaults,
        "essay" => essay_defaults,
        "match" => match_defaults,
        "calculated" => calculated_defaults,
        _ => return None,
    };
    Some(builder)
}

/// Empty combined feedbacks, in HTML
fn with_feedbacks(record: SatelliteRecord) -> SatelliteRecord {
    record
        .with("correctfeedback", "")
        .with("correctfeedbackformat", 1_i64)
        .with("partiallycorrectfeedback", "")
        .with("partiallycorrectfeedbackformat", 1_i64)
        .with("incorrectfeedback", "")
        .with("incorrectfeedbackformat", 1_i64)
}

fn multichoice_defaults(record: SatelliteRecord) -> SatelliteRecord {
    with_feedbacks(
        record
            .with("single", 1_i64)
            .with("shuffleanswers", 1_i64),
    )
    .with("answernumbering", "abc")
    .with("shownumcorrect", 0_i64)
    .with("showstandardinstruction", 0_i64)
}

fn truefalse_defaults(record: SatelliteRecord) -> SatelliteRecord {
    record
        .with("trueanswer", 0_i64)
        .with("falseanswer", 0_i64)
        .with("showstandardinstruction", 0_i64)
}

fn shortanswer_defaults(record: SatelliteRecord) -> SatelliteRecord {
    record.with("usecase", 0_i64)
}

fn numerical_defaults(record: SatelliteRecord) -> SatelliteRecord {
    record
        .with("showunits", 0_i64)
        .with("unitsleft", 0_i64)
        .with("unitgradingtype", 0_i64)
        .with("unitpenalty", 0.1_f64)
}

fn essay_defaults(record: SatelliteRecord) -> SatelliteRecord {
    record
        .with("responseformat", "editor")
        .with("responserequired", 1_i64)
        .with("responsefieldlines", 15_i64)
        .with("attachments", 0_i64)
        .with("attachmentsrequired", 0_i64)
        .with("graderinfo", "")
        .with("graderinfoformat", 1_i64)
        .with("responsetemplate", "")
        .with("responsetemplateformat", 1_i64)
}

fn match_defaults(record: SatelliteRecord) -> SatelliteRecord {
    with_feedbacks(record.with("shuffleanswers", 1_i64)).with("shownumcorrect", 0_i64)
}

fn calculated_defaults(record: SatelliteRecord) -> SatelliteRecord {
    with_feedbacks(
        record
            .with("synchronize", 0_i64)
            .with("single", 0_i64)
            .with("shuffleanswers", 1_i64),
    )
    .with("answernumbering", "abc")
    .with("shownumcorrect", 0_i64)
}

/// Acts on candidates, one transaction per mutation
pub struct DeletionPolicy<'a> {
    state: &'a State,
}

impl<'a> DeletionPolicy<'a> {
    /// Create a policy acting on the store of the given state
    #[must_use]
    pub fn new(state: &'a State) -> Self {
        Self { state }
    }

    /// Classify a candidate, then act on it according to the mode
    pub async fn evaluate_and_act(&self, candidate: Candidate<'_>, mode: Mode) -> Outcome {
        match mode {
            Mode::Report => Outcome::Failed(candidate.issue()),
            Mode::Delete => self.delete(candidate).await,
            Mode::Fix => self.fix(candidate).await,
        }
    }

    async fn delete(&self, candidate: Candidate<'_>) -> Outcome {
        match candidate {
            Candidate::Question(question)
            | Candidate::MissingOptions(question)
            | Candidate::MissingAnswers(question) => self.delete_question(question.id).await,

            Candidate::DuplicateQuestion(question) => match self.find_usage(question.id).await {
                Ok(Some(usage)) => Outcome::Skipped(SkipReason::Used(Some(usage))),
                Ok(None) => self.delete_question(question.id).await,
                Err(e) => Outcome::skipped_on_error(&e),
            },

            Candidate::Category(category) => self.delete_category(category).await,
        }
    }

    async fn fix(&self, candidate: Candidate<'_>) -> Outcome {
        match candidate {
            Candidate::MissingOptions(question) => {
                let Some(record) = self.state.registry().build(question) else {
                    return Outcome::Failed(format!(
                        "no default options for question type {}",
                        question.qtype
                    ));
                };

                match self.insert(&record).await {
                    Ok(()) => Outcome::Fixed,
                    Err(e) => {
                        tracing::warn!(
                            question.id = question.id,
                            error = &e as &dyn std::error::Error,
                            "Could not add the default options"
                        );
                        Outcome::Failed(e.to_string())
                    }
                }
            }
            Candidate::MissingAnswers(_) => {
                Outcome::Failed("cannot fix question without answers".to_owned())
            }
            other => Outcome::Failed(format!("nothing to fix: {}", other.issue())),
        }
    }

    async fn find_usage(&self, id: i64) -> Result<Option<QuestionUsageInfo>, RepositoryError> {
        let mut repo = self.state.repository().await?;
        let usage = repo.question().find_usage(id).await?;
        repo.save().await?;
        Ok(usage)
    }

    async fn insert(&self, record: &SatelliteRecord) -> Result<(), RepositoryError> {
        let mut repo = self.state.repository().await?;
        repo.question_type().insert(record).await?;
        repo.save().await
    }

    /// Delete a question through the authoritative routine, then check it is
    /// really gone
    #[tracing::instrument(name = "policy.delete_question", skip(self), fields(question.id = id))]
    pub async fn delete_question(&self, id: i64) -> Outcome {
        let deleted = async {
            let mut repo = self.state.repository().await?;
            repo.question().delete(id).await?;
            repo.save().await
        };

        if let Err(e) = deleted.await {
            tracing::warn!(error = &e as &dyn std::error::Error, "Could not delete question");
            return Outcome::skipped_on_error(&e);
        }

        let exists = async {
            let mut repo = self.state.repository().await?;
            let exists = repo.question().exists(id).await?;
            repo.save().await?;
            Ok::<_, RepositoryError>(exists)
        };

        match exists.await {
            Ok(false) => Outcome::Deleted,
            Ok(true) => {
                tracing::info!("Question still present after delete");
                Outcome::Skipped(SkipReason::StillPresent)
            }
            Err(e) => Outcome::skipped_on_error(&e),
        }
    }

    /// Delete a category if it is empty, has no subcategories and is not the
    /// root of its context, then check it is really gone
    #[tracing::instrument(
        name = "policy.delete_category",
        skip_all,
        fields(question_category.id = category.id),
    )]
    pub async fn delete_category(&self, category: &QuestionCategory) -> Outcome {
        if category.is_top() {
            return Outcome::Skipped(SkipReason::Protected);
        }

        let id = category.id;
        let deleted = async {
            let mut repo = self.state.repository().await?;
            let count = repo.question_category().count_questions(id).await?;
            if count > 0 {
                repo.cancel().await?;
                return Ok(Some(SkipReason::HasQuestions(count)));
            }

            let children = repo.question_category().count_children(id).await?;
            if children > 0 {
                repo.cancel().await?;
                return Ok(Some(SkipReason::HasSubcategories(children)));
            }

            repo.question_category().delete(id).await?;
            repo.save().await?;
            Ok::<_, RepositoryError>(None)
        };

        match deleted.await {
            Ok(Some(reason)) => return Outcome::Skipped(reason),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = &e as &dyn std::error::Error, "Could not delete category");
                return Outcome::skipped_on_error(&e);
            }
        }

        let exists = async {
            let mut repo = self.state.repository().await?;
            let category = repo.question_category().lookup(id).await?;
            repo.save().await?;
            Ok::<_, RepositoryError>(category.is_some())
        };

        match exists.await {
            Ok(false) => Outcome::Deleted,
            Ok(true) => Outcome::Skipped(SkipReason::StillPresent),
            Err(e) => Outcome::skipped_on_error(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use janitor_data_model::QuestionStatus;
    use janitor_storage_memory::Operation;

    use super::*;
    use crate::test_utils::TestState;

    async fn lookup_category(test: &TestState, id: i64) -> QuestionCategory {
        let mut repo = test.state.repository().await.unwrap();
        let category = repo.question_category().lookup(id).await.unwrap().unwrap();
        repo.save().await.unwrap();
        category
    }

    #[tokio::test]
    async fn a_delete_which_left_the_question_is_skipped() {
        let test = TestState::new();
        let context_id = test.store.add_course(2, "Biology");
        let category = test.store.add_category(context_id, "Default", "a");
        let question = test
            .store
            .add_question(category, "Stuck", "essay", 100, QuestionStatus::Hidden);
        test.store.refuse_delete(question);

        let policy = DeletionPolicy::new(&test.state);
        let outcome = policy
            .evaluate_and_act(
                Candidate::Question(&Question::sample(question, "Stuck", DateTime::UNIX_EPOCH)),
                Mode::Delete,
            )
            .await;

        assert_eq!(outcome, Outcome::Skipped(SkipReason::StillPresent));
        assert!(test.store.has_question(question));
        assert!(
            test.store
                .operations()
                .contains(&Operation::DeleteQuestion(question))
        );
    }

    #[tokio::test]
    async fn a_pinned_duplicate_is_still_present() {
        let test = TestState::new();
        let context_id = test.store.add_course(2, "Biology");
        let category = test.store.add_category(context_id, "Default", "a");
        test.store
            .add_question(category, "Cell", "truefalse", 100, QuestionStatus::Ready);
        let copy = test
            .store
            .add_question(category, "Cell", "truefalse", 200, QuestionStatus::Ready);
        test.store.add_reference(copy, None);

        let policy = DeletionPolicy::new(&test.state);
        let outcome = policy
            .evaluate_and_act(
                Candidate::DuplicateQuestion(&Question::sample(copy, "Cell", DateTime::UNIX_EPOCH)),
                Mode::Delete,
            )
            .await;

        // Not attempted, so the delete is tried, but the reference keeps it
        assert_eq!(outcome, Outcome::Skipped(SkipReason::StillPresent));
        assert!(test.store.has_question(copy));
    }

    #[tokio::test]
    async fn a_delete_which_left_the_category_is_skipped() {
        let test = TestState::new();
        let context_id = test.store.add_course(2, "Biology");
        let id = test.store.add_category(context_id, "Spare", "s");
        test.store.refuse_delete(id);

        let category = lookup_category(&test, id).await;
        let outcome = DeletionPolicy::new(&test.state)
            .delete_category(&category)
            .await;

        assert_eq!(outcome, Outcome::Skipped(SkipReason::StillPresent));
        assert!(test.store.has_category(id));
        assert!(test.store.operations().contains(&Operation::DeleteCategory(id)));
    }

    #[tokio::test]
    async fn categories_with_subcategories_are_kept() {
        let test = TestState::new();
        let context_id = test.store.add_course(2, "Biology");
        let parent = test.store.add_category(context_id, "Chapters", "p");
        let child = test
            .store
            .add_subcategory(parent, "Chapter 1", "c")
            .unwrap();

        let policy = DeletionPolicy::new(&test.state);
        let category = lookup_category(&test, parent).await;
        assert_eq!(
            policy.delete_category(&category).await,
            Outcome::Skipped(SkipReason::HasSubcategories(1))
        );
        assert!(!test.store.operations().contains(&Operation::DeleteCategory(parent)));

        // Once the child is gone, the parent can go too
        let category = lookup_category(&test, child).await;
        assert_eq!(policy.delete_category(&category).await, Outcome::Deleted);
        let category = lookup_category(&test, parent).await;
        assert_eq!(policy.delete_category(&category).await, Outcome::Deleted);
    }

    #[test]
    fn registry_defaults() {
        let registry = DefaultsRegistry::default();
        assert_eq!(registry.qtypes().count(), 7);

        let mut question = Question::sample(42, "Q", DateTime::UNIX_EPOCH);
        question.qtype = "truefalse".to_owned();
        let record = registry.build(&question).unwrap();
        assert_eq!(record.table.name, "question_truefalse");
        assert_eq!(record.table.question_column, "question");
        assert_eq!(record.question_id, 42);
        assert_eq!(record.columns.len(), 3);

        question.qtype = "essay".to_owned();
        let record = registry.build(&question).unwrap();
        assert_eq!(
            record.get("responseformat"),
            Some(&janitor_storage::qtype::SatelliteValue::Text("editor".to_owned()))
        );

        question.qtype = "ddwtos".to_owned();
        assert!(registry.build(&question).is_none());
    }

    #[test]
    fn parse_mode() {
        assert_eq!("fix".parse::<Mode>().unwrap(), Mode::Fix);
        assert!("purge".parse::<Mode>().is_err());
        assert_eq!(Mode::Report.done_label(), "Found");
    }
}
