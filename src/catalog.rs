//! Question provisioning and the fixed team-name pool.
//!
//! Rooms get their question set in one of two ways: deterministic sampling
//! from the built-in templated bank (`build_catalog_questions`), or a
//! pre-validated externally generated batch attached at room creation
//! (`sanitize_generated_batch`). Both paths produce the same
//! [`QuestionRecord`] shape.

use serde_json::Value;

use crate::protocol::types::{DifficultyMode, QuestionDifficulty, QuestionRecord};
use crate::protocol::validation::sanitize_topic;

const MAX_QUESTION_TEXT_CHARS: usize = 300;
const MAX_QUESTION_OPTIONS: usize = 6;
const MIN_QUESTION_OPTIONS: usize = 2;

struct QuestionTemplate {
    text: &'static str,
    options: [&'static str; 4],
    correct_index: usize,
}

const EASY_TEMPLATES: [QuestionTemplate; 3] = [
    QuestionTemplate {
        text: "Что из этого лучше всего описывает тему \"{topic}\"?",
        options: [
            "Практическая задача",
            "Случайный факт",
            "Музыкальный термин",
            "Историческая дата",
        ],
        correct_index: 0,
    },
    QuestionTemplate {
        text: "Какой шаг логичен перед финальным ответом в \"{topic}\"?",
        options: [
            "Перепроверка",
            "Удаление черновика",
            "Игнор вопросов",
            "Выход из комнаты",
        ],
        correct_index: 0,
    },
    QuestionTemplate {
        text: "Что важнее всего для командной игры на тему \"{topic}\"?",
        options: [
            "Скорость без точности",
            "Распределение ролей",
            "Тишина",
            "Один лидер",
        ],
        correct_index: 1,
    },
];

const MEDIUM_TEMPLATES: [QuestionTemplate; 3] = [
    QuestionTemplate {
        text: "Какой подход обычно самый эффективный в \"{topic}\"?",
        options: [
            "Пробовать без плана",
            "Игнорировать данные",
            "Проверять гипотезы",
            "Избегать изменений",
        ],
        correct_index: 2,
    },
    QuestionTemplate {
        text: "Какой вариант чаще приводит к лучшему результату в \"{topic}\"?",
        options: [
            "Итерации",
            "Случайный выбор",
            "Отсутствие обратной связи",
            "Пауза",
        ],
        correct_index: 0,
    },
    QuestionTemplate {
        text: "Что помогает снизить ошибки при решении задач \"{topic}\"?",
        options: [
            "Пропуск проверки",
            "Ограничение времени до 1 секунды",
            "Ревью ответов",
            "Смена темы",
        ],
        correct_index: 2,
    },
];

const HARD_TEMPLATES: [QuestionTemplate; 2] = [
    QuestionTemplate {
        text: "Что обычно усиливает шанс победы в командном раунде по \"{topic}\"?",
        options: [
            "Споры без решения",
            "Случайные клики",
            "Командная координация",
            "Паузы 5 минут",
        ],
        correct_index: 2,
    },
    QuestionTemplate {
        text: "Какая стратегия надёжнее всего при жёстком лимите времени в \"{topic}\"?",
        options: [
            "Отвечать наугад сразу",
            "Сначала исключить заведомо неверное",
            "Ждать до последней секунды",
            "Менять ответ каждые 5 секунд",
        ],
        correct_index: 1,
    },
];

fn templates_for(difficulty: QuestionDifficulty) -> &'static [QuestionTemplate] {
    match difficulty {
        QuestionDifficulty::Easy => &EASY_TEMPLATES,
        QuestionDifficulty::Medium => &MEDIUM_TEMPLATES,
        QuestionDifficulty::Hard => &HARD_TEMPLATES,
    }
}

/// Per-question difficulty sequence for a game of `count` questions.
///
/// Fixed modes repeat one level, `mixed` cycles easy → medium → hard, and
/// `progressive` ramps toward hard over the 5..=7 question range.
pub fn build_difficulty_plan(count: usize, mode: DifficultyMode) -> Vec<QuestionDifficulty> {
    use QuestionDifficulty::{Easy, Hard, Medium};
    match mode {
        DifficultyMode::Easy => vec![Easy; count],
        DifficultyMode::Medium => vec![Medium; count],
        DifficultyMode::Hard => vec![Hard; count],
        DifficultyMode::Progressive => {
            let ramp: &[QuestionDifficulty] = if count <= 5 {
                &[Easy, Medium, Hard, Hard, Hard]
            } else if count == 6 {
                &[Easy, Medium, Medium, Hard, Hard, Hard]
            } else {
                &[Easy, Medium, Medium, Hard, Hard, Hard, Hard]
            };
            ramp.iter().copied().take(count).collect()
        }
        DifficultyMode::Mixed => {
            let cycle = [Easy, Medium, Hard];
            (0..count).map(|i| cycle[i % cycle.len()]).collect()
        }
    }
}

/// Deterministically sample the built-in bank for a topic.
pub fn build_catalog_questions(
    topic: &str,
    count: usize,
    mode: DifficultyMode,
) -> Vec<QuestionRecord> {
    let topic = sanitize_topic(topic);
    let plan = build_difficulty_plan(count, mode);
    let mut cursors = [0usize; 3];

    plan.iter()
        .enumerate()
        .map(|(index, &difficulty)| {
            let bucket = templates_for(difficulty);
            let cursor = &mut cursors[difficulty as usize];
            let template = &bucket[*cursor % bucket.len()];
            *cursor += 1;

            QuestionRecord {
                id: (index + 1).to_string(),
                text: template.text.replace("{topic}", &topic),
                options: template.options.iter().map(|s| (*s).to_string()).collect(),
                correct_index: template.correct_index,
                difficulty,
            }
        })
        .collect()
}

/// Validate one externally generated question entry.
///
/// Returns `None` for entries that cannot be trusted: empty text, fewer than
/// two non-empty options, or a correct index out of range.
pub fn sanitize_generated_entry(raw: &Value, fallback_id: usize) -> Option<QuestionRecord> {
    let obj = raw.as_object()?;
    let text: String = obj
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .chars()
        .take(MAX_QUESTION_TEXT_CHARS)
        .collect();
    if text.is_empty() {
        return None;
    }

    let options: Vec<String> = obj
        .get("options")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|option| {
            let trimmed = option.as_str().map(str::trim).unwrap_or_default();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .take(MAX_QUESTION_OPTIONS)
        .collect();
    if options.len() < MIN_QUESTION_OPTIONS {
        return None;
    }

    let correct_index = obj
        .get("correctIndex")
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize;
    if correct_index >= options.len() {
        return None;
    }

    let difficulty = obj
        .get("difficulty")
        .and_then(|d| serde_json::from_value::<QuestionDifficulty>(d.clone()).ok())
        .unwrap_or_default();

    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| fallback_id.to_string());

    Some(QuestionRecord {
        id,
        text,
        options,
        correct_index,
        difficulty,
    })
}

/// Validate a whole generated batch; `None` when fewer than `count` entries
/// survive sanitization.
pub fn sanitize_generated_batch(raw: &[Value], count: usize) -> Option<Vec<QuestionRecord>> {
    let sanitized: Vec<QuestionRecord> = raw
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| sanitize_generated_entry(entry, index + 1))
        .collect();
    if sanitized.len() < count {
        return None;
    }
    Some(sanitized.into_iter().take(count).collect())
}

/// Fixed pool for the random-team-name request during team naming.
pub const TEAM_NAME_POOL: [&str; 35] = [
    "Импульс",
    "Перехват",
    "Фактор X",
    "Блиц-режим",
    "Прорыв",
    "Сверхновые",
    "Форсаж",
    "Рубеж",
    "Эпицентр",
    "Нулевая ошибка",
    "Контрольная точка",
    "Финальный ход",
    "Скрытый потенциал",
    "Мозговой штурм",
    "Решающий аргумент",
    "Горизонт",
    "Точка прорыва",
    "Стратегический резерв",
    "Ускорение",
    "Предел концентрации",
    "Критическая масса",
    "Вектор",
    "Смена парадигмы",
    "Код доступа",
    "Глубокий анализ",
    "Системный подход",
    "Синхронизация",
    "Быстрая логика",
    "Тактический ход",
    "Зона влияния",
    "Интеллектуальный шторм",
    "Второе дыхание",
    "Пиковая форма",
    "Точный расчёт",
    "Момент истины",
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn catalog_produces_requested_count() {
        let questions = build_catalog_questions("История", 7, DifficultyMode::Mixed);
        assert_eq!(questions.len(), 7);
        for (index, question) in questions.iter().enumerate() {
            assert_eq!(question.id, (index + 1).to_string());
            assert!(question.text.contains("История"));
            assert!(question.correct_index < question.options.len());
        }
    }

    #[test]
    fn mixed_plan_cycles_difficulties() {
        let plan = build_difficulty_plan(6, DifficultyMode::Mixed);
        assert_eq!(
            plan,
            vec![
                QuestionDifficulty::Easy,
                QuestionDifficulty::Medium,
                QuestionDifficulty::Hard,
                QuestionDifficulty::Easy,
                QuestionDifficulty::Medium,
                QuestionDifficulty::Hard,
            ]
        );
    }

    #[test]
    fn progressive_plan_ramps_to_hard() {
        let plan = build_difficulty_plan(5, DifficultyMode::Progressive);
        assert_eq!(plan[0], QuestionDifficulty::Easy);
        assert_eq!(plan[4], QuestionDifficulty::Hard);
        let plan7 = build_difficulty_plan(7, DifficultyMode::Progressive);
        assert_eq!(plan7.len(), 7);
        assert_eq!(plan7[6], QuestionDifficulty::Hard);
    }

    #[test]
    fn generated_entry_rejects_bad_correct_index() {
        let raw = json!({
            "text": "Вопрос?",
            "options": ["Да", "Нет"],
            "correctIndex": 5
        });
        assert!(sanitize_generated_entry(&raw, 1).is_none());
    }

    #[test]
    fn generated_entry_drops_empty_options() {
        let raw = json!({
            "text": "Вопрос?",
            "options": ["Да", "  ", "Нет"],
            "correctIndex": 1
        });
        let record = sanitize_generated_entry(&raw, 1).unwrap();
        assert_eq!(record.options, vec!["Да", "Нет"]);
        assert_eq!(record.correct_index, 1);
    }

    #[test]
    fn generated_batch_requires_enough_valid_entries() {
        let raw = vec![
            json!({"text": "В1?", "options": ["a", "b"], "correctIndex": 0}),
            json!({"text": "", "options": ["a", "b"], "correctIndex": 0}),
        ];
        assert!(sanitize_generated_batch(&raw, 2).is_none());
        assert_eq!(sanitize_generated_batch(&raw, 1).unwrap().len(), 1);
    }
}
