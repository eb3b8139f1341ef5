// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! The tables of the in-memory store, and the queries on them

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use janitor_data_model::{
    Course, PREVIEW_COMPONENT, Question, QuestionCategory, QuestionStatistics, QuestionStatus,
    QuestionUsageInfo, Quiz, QuizAttempt, User,
};
use janitor_storage::{
    DuplicateGroup,
    qtype::{SatelliteRecord, SatelliteTable},
    queue::Job,
};

#[derive(Debug, Clone)]
pub(crate) struct Usage {
    pub component: String,
    pub context_id: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct QuestionAttemptRow {
    pub usage_id: i64,
    pub question_id: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct VersionRow {
    pub entry_id: i64,
    pub version: i64,
    pub status: QuestionStatus,
}

#[derive(Debug, Clone)]
pub(crate) struct ReferenceRow {
    pub entry_id: i64,
    pub version: Option<i64>,
}

#[derive(Debug, Clone)]
pub(crate) struct JobRow {
    pub job: Job,
    pub started_at: Option<DateTime<Utc>>,
    pub fail_delay: i64,
    pub next_run_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryState {
    next_id: i64,

    pub courses: BTreeMap<i64, Course>,
    pub course_contexts: BTreeMap<i64, i64>,
    pub quizzes: BTreeMap<i64, Quiz>,
    pub attempts: BTreeMap<i64, QuizAttempt>,
    pub usages: BTreeMap<i64, Usage>,
    pub question_attempts: BTreeMap<i64, QuestionAttemptRow>,
    pub questions: BTreeMap<i64, Question>,
    pub versions: BTreeMap<i64, VersionRow>,
    pub entries: BTreeMap<i64, i64>,
    pub references: Vec<ReferenceRow>,
    pub categories: BTreeMap<i64, QuestionCategory>,
    pub answers: BTreeSet<i64>,
    pub satellite_tables: BTreeSet<&'static str>,
    pub satellites: BTreeMap<(&'static str, i64), SatelliteRecord>,
    pub users: BTreeMap<i64, User>,
    pub jobs: BTreeMap<i64, JobRow>,
}

impl MemoryState {
    pub fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn question_context(&self, question: &Question) -> Option<i64> {
        self.categories
            .get(&question.category_id)
            .map(|category| category.context_id)
    }

    fn in_context(&self, question: &Question, context_id: Option<i64>) -> bool {
        context_id.is_none_or(|context_id| self.question_context(question) == Some(context_id))
    }

    pub fn questions_in(&self, context_id: Option<i64>) -> impl Iterator<Item = &Question> {
        self.questions
            .values()
            .filter(move |question| self.in_context(question, context_id))
    }

    /// The first attempt on the question outside of a preview, if any
    pub fn real_usage(&self, question_id: i64) -> Option<(i64, &Usage)> {
        self.question_attempts
            .values()
            .filter(|row| row.question_id == question_id)
            .filter_map(|row| self.usages.get(&row.usage_id).map(|u| (row.usage_id, u)))
            .find(|(_, usage)| usage.component != PREVIEW_COMPONENT)
    }

    pub fn is_used(&self, question_id: i64) -> bool {
        self.real_usage(question_id).is_some()
    }

    pub fn usage_info(&self, question_id: i64) -> Option<QuestionUsageInfo> {
        let (usage_id, usage) = self.real_usage(question_id)?;
        let quiz = self
            .attempts
            .values()
            .find(|attempt| attempt.usage_id == usage_id)
            .and_then(|attempt| self.quizzes.get(&attempt.quiz_id));

        // Quizzes double as their own course module here
        Some(QuestionUsageInfo {
            component: usage.component.clone(),
            context_id: usage.context_id,
            course_id: quiz.map(|quiz| quiz.course_id),
            course_module_id: quiz.map(|quiz| quiz.id),
            activity: quiz.map(|quiz| quiz.name.clone()),
        })
    }

    fn max_version(&self, entry_id: i64) -> Option<i64> {
        self.versions
            .values()
            .filter(|version| version.entry_id == entry_id)
            .map(|version| version.version)
            .max()
    }

    /// Whether a question reference pins the version of this question
    pub fn is_pinned(&self, question_id: i64) -> bool {
        let Some(version) = self.versions.get(&question_id) else {
            return false;
        };

        self.references
            .iter()
            .filter(|reference| reference.entry_id == version.entry_id)
            .any(|reference| {
                let live = reference
                    .version
                    .or_else(|| self.max_version(version.entry_id));
                live == Some(version.version)
            })
    }

    pub fn is_unused(&self, question_id: i64) -> bool {
        let hidden = self
            .versions
            .get(&question_id)
            .is_some_and(|version| version.status == QuestionStatus::Hidden);

        hidden && !self.is_used(question_id) && !self.is_pinned(question_id)
    }

    /// Delete a question the way the LMS does it: nothing happens if the
    /// question is still used or referenced.
    pub fn delete_question(&mut self, question_id: i64) {
        if self.is_used(question_id) || self.is_pinned(question_id) {
            return;
        }

        // Preview attempts go away with the question
        self.question_attempts
            .retain(|_, row| row.question_id != question_id);

        self.questions.remove(&question_id);
        self.answers.remove(&question_id);
        self.satellites.retain(|(_, id), _| *id != question_id);

        if let Some(version) = self.versions.remove(&question_id) {
            let entry_id = version.entry_id;
            if !self.versions.values().any(|v| v.entry_id == entry_id) {
                self.entries.remove(&entry_id);
                self.references.retain(|r| r.entry_id != entry_id);
            }
        }
    }

    pub fn delete_attempt(&mut self, attempt_id: i64) {
        if let Some(attempt) = self.attempts.remove(&attempt_id) {
            self.usages.remove(&attempt.usage_id);
            self.question_attempts
                .retain(|_, row| row.usage_id != attempt.usage_id);
        }
    }

    pub fn attempt_matches(
        &self,
        attempt: &QuizAttempt,
        filter: &janitor_storage::attempt::QuizAttemptFilter,
    ) -> bool {
        if attempt.started_at >= filter.started_before() {
            return false;
        }

        if let Some(quiz_id) = filter.quiz_id() {
            if attempt.quiz_id != quiz_id {
                return false;
            }
        }

        if let Some(course_id) = filter.course_id() {
            let in_course = self
                .quizzes
                .get(&attempt.quiz_id)
                .is_some_and(|quiz| quiz.course_id == course_id);
            if !in_course {
                return false;
            }
        }

        true
    }

    fn sorted_by_age(mut questions: Vec<Question>) -> Vec<Question> {
        questions.sort_by_key(|question| (question.created_at, question.id));
        questions
    }

    pub fn questions_named(&self, context_id: i64, name: &str) -> Vec<Question> {
        Self::sorted_by_age(
            self.questions_in(Some(context_id))
                .filter(|question| question.name == name)
                .cloned()
                .collect(),
        )
    }

    pub fn duplicate_question_names(&self, context_id: i64) -> Vec<DuplicateGroup> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for question in self.questions_in(Some(context_id)) {
            *counts.entry(question.name.as_str()).or_default() += 1;
        }

        counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(name, count)| DuplicateGroup {
                name: name.to_owned(),
                context_id,
                count,
            })
            .collect()
    }

    pub fn categories_named(&self, context_id: i64, name: &str) -> Vec<QuestionCategory> {
        let mut categories: Vec<_> = self
            .categories
            .values()
            .filter(|category| category.context_id == context_id && category.name == name)
            .cloned()
            .collect();
        categories.sort_by(|a, b| (&a.stamp, a.id).cmp(&(&b.stamp, b.id)));
        categories
    }

    pub fn duplicate_category_names(&self, context_id: Option<i64>) -> Vec<DuplicateGroup> {
        let mut counts: BTreeMap<(i64, &str), usize> = BTreeMap::new();
        for category in self.categories.values() {
            if context_id.is_none_or(|id| id == category.context_id) {
                *counts
                    .entry((category.context_id, category.name.as_str()))
                    .or_default() += 1;
            }
        }

        counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|((context_id, name), count)| DuplicateGroup {
                name: name.to_owned(),
                context_id,
                count,
            })
            .collect()
    }

    pub fn category_question_count(&self, category_id: i64) -> usize {
        self.versions
            .iter()
            .filter(|(_, version)| self.entries.get(&version.entry_id) == Some(&category_id))
            .filter(|(question_id, _)| self.questions.contains_key(question_id))
            .count()
    }

    pub fn missing_options(
        &self,
        context_id: Option<i64>,
        qtype: &str,
        table: SatelliteTable,
    ) -> Vec<Question> {
        self.questions_in(context_id)
            .filter(|question| question.qtype == qtype)
            .filter(|question| !self.satellites.contains_key(&(table.name, question.id)))
            .cloned()
            .collect()
    }

    pub fn without_answers(&self, context_id: Option<i64>, qtypes: &[&str]) -> Vec<Question> {
        self.questions_in(context_id)
            .filter(|question| qtypes.contains(&question.qtype.as_str()))
            .filter(|question| !self.answers.contains(&question.id))
            .cloned()
            .collect()
    }

    pub fn statistics(&self, context_id: i64) -> QuestionStatistics {
        let questions: Vec<_> = self.questions_in(Some(context_id)).collect();
        let total = questions.len() as u64;
        let unused = questions.iter().filter(|q| !self.is_used(q.id)).count() as u64;
        let duplicates = self
            .duplicate_question_names(context_id)
            .iter()
            .map(|group| group.surplus() as u64)
            .sum();

        let mut empty_categories = 0;
        let mut empty_duplicate_categories = 0;
        let categories = self
            .categories
            .values()
            .filter(|category| category.context_id == context_id && !category.is_top());
        for category in categories {
            if self.category_question_count(category.id) == 0 {
                empty_categories += 1;
            }
        }

        for group in self.duplicate_category_names(Some(context_id)) {
            if group.name == janitor_data_model::TOP_CATEGORY_NAME {
                continue;
            }
            let mut members: Vec<_> = self
                .categories
                .values()
                .filter(|c| c.context_id == context_id && c.name == group.name)
                .collect();
            members.sort_by_key(|c| c.id);
            empty_duplicate_categories += members
                .iter()
                .skip(1)
                .filter(|c| self.category_question_count(c.id) == 0)
                .count() as u64;
        }

        QuestionStatistics {
            total,
            unused,
            duplicates,
            empty_categories,
            empty_duplicate_categories,
        }
    }
}
