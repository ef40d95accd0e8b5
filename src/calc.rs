use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// The four fixed assessment categories. Declaration order is the order every
/// result lists them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Assignment,
    Quiz,
    Midterm,
    Final,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Assignment,
        Category::Quiz,
        Category::Midterm,
        Category::Final,
    ];

    /// Tags are matched case-insensitively after trimming; anything else is
    /// not a category.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "assignment" => Some(Category::Assignment),
            "quiz" => Some(Category::Quiz),
            "midterm" => Some(Category::Midterm),
            "final" => Some(Category::Final),
            _ => None,
        }
    }
}

pub const DEFAULT_ASSIGNMENT_WEIGHT: f64 = 20.0;
pub const DEFAULT_QUIZ_WEIGHT: f64 = 20.0;
pub const DEFAULT_MIDTERM_WEIGHT: f64 = 25.0;
pub const DEFAULT_FINAL_WEIGHT: f64 = 35.0;

pub const DEFAULT_A_MIN: f64 = 90.0;
pub const DEFAULT_B_MIN: f64 = 80.0;
pub const DEFAULT_C_MIN: f64 = 70.0;
pub const DEFAULT_D_MIN: f64 = 60.0;
pub const DEFAULT_FLOOR_LETTER: &str = "F";

/// Slack applied at letter cut points so a sum like 79.99999999999999 still
/// lands on the 80 boundary.
const LETTER_EPSILON: f64 = 1e-9;

/// Raw per-course weight record as stored or supplied by a caller. Any field may
/// be missing; see [`resolve_weights`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightConfig {
    #[serde(default)]
    pub assignment_weight: Option<f64>,
    #[serde(default)]
    pub quiz_weight: Option<f64>,
    #[serde(default)]
    pub midterm_weight: Option<f64>,
    #[serde(default)]
    pub final_weight: Option<f64>,
}

impl WeightConfig {
    /// Lenient decode: a field counts as present only when it is a JSON number.
    /// Strings, booleans and nulls all read as absent.
    pub fn from_json(raw: &serde_json::Value) -> Self {
        let field = |key: &str| raw.get(key).and_then(|v| v.as_f64());
        WeightConfig {
            assignment_weight: field("assignmentWeight"),
            quiz_weight: field("quizWeight"),
            midterm_weight: field("midtermWeight"),
            final_weight: field("finalWeight"),
        }
    }

    pub fn get(&self, category: Category) -> Option<f64> {
        match category {
            Category::Assignment => self.assignment_weight,
            Category::Quiz => self.quiz_weight,
            Category::Midterm => self.midterm_weight,
            Category::Final => self.final_weight,
        }
    }

    pub fn set(&mut self, category: Category, value: Option<f64>) {
        match category {
            Category::Assignment => self.assignment_weight = value,
            Category::Quiz => self.quiz_weight = value,
            Category::Midterm => self.midterm_weight = value,
            Category::Final => self.final_weight = value,
        }
    }
}

/// Fully-populated weights, one per category, in percentage points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightSet {
    pub assignment: f64,
    pub quiz: f64,
    pub midterm: f64,
    #[serde(rename = "final")]
    pub final_exam: f64,
}

impl Default for WeightSet {
    fn default() -> Self {
        WeightSet {
            assignment: DEFAULT_ASSIGNMENT_WEIGHT,
            quiz: DEFAULT_QUIZ_WEIGHT,
            midterm: DEFAULT_MIDTERM_WEIGHT,
            final_exam: DEFAULT_FINAL_WEIGHT,
        }
    }
}

impl WeightSet {
    pub fn get(&self, category: Category) -> f64 {
        match category {
            Category::Assignment => self.assignment,
            Category::Quiz => self.quiz,
            Category::Midterm => self.midterm,
            Category::Final => self.final_exam,
        }
    }

    pub fn sum(&self) -> f64 {
        Category::ALL.iter().map(|c| self.get(*c)).sum()
    }
}

fn usable_weight(v: Option<f64>) -> Option<f64> {
    v.filter(|w| w.is_finite() && *w >= 0.0)
}

/// Fills every category independently: a finite, non-negative field wins,
/// anything else falls back to that category's default. Never fails.
pub fn resolve_weights(raw: Option<&WeightConfig>) -> WeightSet {
    let defaults = WeightSet::default();
    let Some(raw) = raw else {
        return defaults;
    };
    let pick = |c: Category| usable_weight(raw.get(c)).unwrap_or_else(|| defaults.get(c));
    WeightSet {
        assignment: pick(Category::Assignment),
        quiz: pick(Category::Quiz),
        midterm: pick(Category::Midterm),
        final_exam: pick(Category::Final),
    }
}

/// One recorded score. The category stays a raw tag so that records with an
/// unknown tag reach the engine and get counted as excluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentItem {
    pub category: String,
    pub score: f64,
    /// Missing maxima decode as 0 and are excluded like any other
    /// non-positive maximum.
    #[serde(default)]
    pub max_score: f64,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub graded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemFault {
    UnknownCategory,
    NonPositiveMax,
    NonFiniteScore,
}

/// Checks one item against the aggregation rules. `Ok` carries its category.
pub fn classify_item(item: &AssessmentItem) -> Result<Category, ItemFault> {
    let category = Category::parse(&item.category).ok_or(ItemFault::UnknownCategory)?;
    if !item.max_score.is_finite() || item.max_score <= 0.0 {
        return Err(ItemFault::NonPositiveMax);
    }
    if !item.score.is_finite() {
        return Err(ItemFault::NonFiniteScore);
    }
    Ok(category)
}

fn item_ratio(item: &AssessmentItem) -> f64 {
    item.score.max(0.0) / item.max_score
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBreakdown {
    pub category: Category,
    pub weight: f64,
    pub item_count: usize,
    pub excluded_count: usize,
    /// Plain mean of each item's own percentage; `None` with no valid items.
    pub mean_percent: Option<f64>,
    pub weighted: f64,
    pub latest_graded_at: Option<DateTime<Utc>>,
}

/// Reduces the valid items of one category to its weighted contribution.
///
/// Each item is normalized to its own scale before averaging, so a 5-point quiz
/// counts as much as a 100-point one. The category weight is spread over a
/// weighted mean of the ratios: an item's usable override is its relative
/// weight, any other item counts 1. With no overrides this is exactly
/// `mean ratio * weight`. A category whose relative weights are all zero
/// contributes nothing.
pub fn reduce_category(
    category: Category,
    weight: f64,
    items: &[&AssessmentItem],
    excluded_count: usize,
) -> CategoryBreakdown {
    let latest_graded_at = items.iter().filter_map(|i| i.graded_at).max();
    if items.is_empty() {
        return CategoryBreakdown {
            category,
            weight,
            item_count: 0,
            excluded_count,
            mean_percent: None,
            weighted: 0.0,
            latest_graded_at,
        };
    }

    let n = items.len() as f64;
    let mut ratio_sum = 0.0_f64;
    let mut weighted_ratio_sum = 0.0_f64;
    let mut weight_total = 0.0_f64;
    for item in items {
        let ratio = item_ratio(item);
        let w = usable_weight(item.weight).unwrap_or(1.0);
        ratio_sum += ratio;
        weighted_ratio_sum += ratio * w;
        weight_total += w;
    }
    let weighted = if weight_total > 0.0 {
        (weighted_ratio_sum / weight_total) * weight
    } else {
        0.0
    };

    CategoryBreakdown {
        category,
        weight,
        item_count: items.len(),
        excluded_count,
        mean_percent: Some(100.0 * ratio_sum / n),
        weighted,
        latest_graded_at,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LetterCut {
    pub min_percent: f64,
    pub letter: String,
}

/// Ordered cut points (inclusive lower bounds, highest first) plus the letter
/// for everything below the last cut.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LetterScale {
    pub cuts: Vec<LetterCut>,
    pub floor: String,
}

impl Default for LetterScale {
    fn default() -> Self {
        let cut = |min_percent: f64, letter: &str| LetterCut {
            min_percent,
            letter: letter.to_string(),
        };
        LetterScale {
            cuts: vec![
                cut(DEFAULT_A_MIN, "A"),
                cut(DEFAULT_B_MIN, "B"),
                cut(DEFAULT_C_MIN, "C"),
                cut(DEFAULT_D_MIN, "D"),
            ],
            floor: DEFAULT_FLOOR_LETTER.to_string(),
        }
    }
}

impl LetterScale {
    pub fn letter_for(&self, percentage: f64) -> &str {
        self.cuts
            .iter()
            .find(|c| percentage + LETTER_EPSILON >= c.min_percent)
            .map(|c| c.letter.as_str())
            .unwrap_or(self.floor.as_str())
    }

    /// Letters in display order, floor last.
    pub fn letters(&self) -> impl Iterator<Item = &str> {
        self.cuts
            .iter()
            .map(|c| c.letter.as_str())
            .chain(std::iter::once(self.floor.as_str()))
    }

    pub fn validate(&self) -> Result<(), CalcError> {
        if self.floor.trim().is_empty() {
            return Err(CalcError::new("bad_params", "letterScale.floor must be non-empty"));
        }
        let mut prev: Option<f64> = None;
        for (i, cut) in self.cuts.iter().enumerate() {
            if !cut.min_percent.is_finite() {
                return Err(CalcError::new(
                    "bad_params",
                    format!("letterScale.cuts[{}].minPercent must be finite", i),
                ));
            }
            if cut.letter.trim().is_empty() {
                return Err(CalcError::new(
                    "bad_params",
                    format!("letterScale.cuts[{}].letter must be non-empty", i),
                ));
            }
            if let Some(p) = prev {
                if cut.min_percent >= p {
                    return Err(CalcError::new(
                        "bad_params",
                        "letterScale.cuts must be strictly descending by minPercent",
                    ));
                }
            }
            prev = Some(cut.min_percent);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationResult {
    pub course_id: String,
    pub student_id: String,
    pub category_weighted: BTreeMap<Category, f64>,
    pub final_percentage: f64,
    pub letter_grade: String,
    pub weight_sum: f64,
    pub excluded_items: usize,
    pub categories: Vec<CategoryBreakdown>,
}

/// Turns one student's items in one course into a course percentage and letter.
///
/// Pure: the result depends only on the arguments. Malformed items are left
/// out, missing weights take defaults, and weights that do not sum to 100 are
/// used as given (no renormalization), so this never fails.
pub fn aggregate(
    course_id: &str,
    student_id: &str,
    items: &[AssessmentItem],
    weights: Option<&WeightConfig>,
    scale: &LetterScale,
) -> AggregationResult {
    let resolved = resolve_weights(weights);

    let mut valid: HashMap<Category, Vec<&AssessmentItem>> = HashMap::new();
    let mut excluded: HashMap<Category, usize> = HashMap::new();
    let mut excluded_items = 0_usize;
    for item in items {
        match classify_item(item) {
            Ok(category) => valid.entry(category).or_default().push(item),
            Err(ItemFault::UnknownCategory) => excluded_items += 1,
            Err(_) => {
                excluded_items += 1;
                if let Some(category) = Category::parse(&item.category) {
                    *excluded.entry(category).or_insert(0) += 1;
                }
            }
        }
    }

    let categories: Vec<CategoryBreakdown> = Category::ALL
        .iter()
        .map(|c| {
            let bucket = valid.get(c).map(|v| v.as_slice()).unwrap_or(&[]);
            reduce_category(
                *c,
                resolved.get(*c),
                bucket,
                excluded.get(c).copied().unwrap_or(0),
            )
        })
        .collect();

    let final_percentage: f64 = categories.iter().map(|b| b.weighted).sum();
    let category_weighted = categories.iter().map(|b| (b.category, b.weighted)).collect();

    AggregationResult {
        course_id: course_id.to_string(),
        student_id: student_id.to_string(),
        category_weighted,
        final_percentage,
        letter_grade: scale.letter_for(final_percentage).to_string(),
        weight_sum: resolved.sum(),
        excluded_items,
        categories,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct RosterStudent {
    pub id: String,
    pub display_name: String,
    pub sort_order: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGrade {
    pub student_id: String,
    pub display_name: String,
    pub sort_order: i64,
    pub active: bool,
    pub result: AggregationResult,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryClassAverage {
    pub category: Category,
    pub weight: f64,
    pub class_avg_percent: Option<f64>,
    pub student_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LetterCount {
    pub letter: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSummary {
    pub course: CourseRef,
    pub weights: WeightSet,
    pub weight_sum: f64,
    pub letter_scale: LetterScale,
    pub per_student: Vec<StudentGrade>,
    pub per_category: Vec<CategoryClassAverage>,
    pub class_average: Option<f64>,
    pub letter_distribution: Vec<LetterCount>,
}

/// Runs [`aggregate`] for every student on the roster and adds class-level
/// figures. Class averages and the letter distribution cover active students
/// only; category averages skip students with no valid item in that category.
pub fn summarize_course(
    course: CourseRef,
    roster: &[RosterStudent],
    items_by_student: &HashMap<String, Vec<AssessmentItem>>,
    weights: Option<&WeightConfig>,
    scale: &LetterScale,
) -> CourseSummary {
    let resolved = resolve_weights(weights);

    let per_student: Vec<StudentGrade> = roster
        .iter()
        .map(|s| {
            let items = items_by_student
                .get(&s.id)
                .map(|v| v.as_slice())
                .unwrap_or(&[]);
            StudentGrade {
                student_id: s.id.clone(),
                display_name: s.display_name.clone(),
                sort_order: s.sort_order,
                active: s.active,
                result: aggregate(&course.id, &s.id, items, weights, scale),
            }
        })
        .collect();

    let active: Vec<&StudentGrade> = per_student.iter().filter(|g| g.active).collect();

    let per_category = Category::ALL
        .iter()
        .map(|c| {
            let means: Vec<f64> = active
                .iter()
                .filter_map(|g| {
                    g.result
                        .categories
                        .iter()
                        .find(|b| b.category == *c)
                        .and_then(|b| b.mean_percent)
                })
                .collect();
            CategoryClassAverage {
                category: *c,
                weight: resolved.get(*c),
                class_avg_percent: mean(&means),
                student_count: means.len(),
            }
        })
        .collect();

    let finals: Vec<f64> = active.iter().map(|g| g.result.final_percentage).collect();

    let mut letter_distribution: Vec<LetterCount> = Vec::new();
    for letter in scale.letters() {
        if letter_distribution.iter().any(|l| l.letter == letter) {
            continue;
        }
        letter_distribution.push(LetterCount {
            letter: letter.to_string(),
            count: 0,
        });
    }
    for g in &active {
        if let Some(slot) = letter_distribution
            .iter_mut()
            .find(|l| l.letter == g.result.letter_grade)
        {
            slot.count += 1;
        }
    }

    CourseSummary {
        course,
        weights: resolved,
        weight_sum: resolved.sum(),
        letter_scale: scale.clone(),
        per_student,
        per_category,
        class_average: mean(&finals),
        letter_distribution,
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / (values.len() as f64))
    }
}
