use std::sync::RwLock;

/// Categories every fresh database starts with.
pub const DEFAULT_CATEGORIES: &[&str] = &["Groceries", "Electronics", "Entertainment", "Other"];

pub const FALLBACK_CATEGORY: &str = "Other";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCategory {
    pub name: String,
    pub created: bool,
}

/// Open but normalised category vocabulary, shared by the intent
/// interpreter and the ingestion pipeline so imported and chat-entered
/// expenses land in the same categories.
pub struct CategoryVocabulary {
    names: RwLock<Vec<String>>,
}

impl CategoryVocabulary {
    /// Seed with the defaults plus whatever categories already exist in
    /// the repository.
    pub fn new(existing: Vec<String>) -> Self {
        let mut names: Vec<String> = DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect();
        for name in existing {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                names.push(name);
            }
        }
        Self {
            names: RwLock::new(names),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.names.read().expect("vocabulary lock poisoned").clone()
    }

    /// Category list formatted for the model's system prompt.
    pub fn schema_for_prompt(&self) -> String {
        let mut out = String::new();
        for name in self.names().iter() {
            out.push_str(&format!("- {}\n", name));
        }
        out
    }

    /// Map free category text onto the vocabulary: trimmed and
    /// case-folded, then fuzzy-matched by edit distance against known
    /// names. Text that matches nothing becomes a fresh category rather
    /// than an error.
    pub fn resolve(&self, input: &str) -> ResolvedCategory {
        let display = display_name(input);
        if display.is_empty() {
            return ResolvedCategory {
                name: FALLBACK_CATEGORY.to_string(),
                created: false,
            };
        }
        let normalized = display.to_lowercase();

        let mut names = self.names.write().expect("vocabulary lock poisoned");

        if let Some(existing) = names.iter().find(|n| n.to_lowercase() == normalized) {
            return ResolvedCategory {
                name: existing.clone(),
                created: false,
            };
        }

        let threshold = similarity_threshold(&normalized);
        let mut best: Option<(usize, &String)> = None;
        for candidate in names.iter() {
            let distance = levenshtein(&normalized, &candidate.to_lowercase());
            if distance > threshold {
                continue;
            }
            let replace = match &best {
                None => true,
                Some((best_distance, best_name)) => {
                    distance < *best_distance
                        || (distance == *best_distance && candidate.len() < best_name.len())
                }
            };
            if replace {
                best = Some((distance, candidate));
            }
        }

        if let Some((_, name)) = best {
            let name = name.clone();
            return ResolvedCategory {
                name,
                created: false,
            };
        }

        names.push(display.clone());
        ResolvedCategory {
            name: display,
            created: true,
        }
    }

    /// Best-effort category for rows that carry no category text: the
    /// first known name appearing inside the description.
    pub fn keyword_match(&self, description: &str) -> Option<String> {
        let haystack = description.to_lowercase();
        self.names()
            .into_iter()
            .find(|name| haystack.contains(&name.to_lowercase()))
    }
}

fn display_name(input: &str) -> String {
    input
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn similarity_threshold(input: &str) -> usize {
    let len = input.chars().count();
    if len <= 6 { 1 } else { 2 }
}

fn levenshtein(left: &str, right: &str) -> usize {
    let left: Vec<char> = left.chars().collect();
    let right: Vec<char> = right.chars().collect();

    if left.is_empty() {
        return right.len();
    }
    if right.is_empty() {
        return left.len();
    }

    let mut costs: Vec<usize> = (0..=right.len()).collect();

    for (i, left_char) in left.iter().enumerate() {
        let mut last_cost = i;
        costs[0] = i + 1;
        for (j, right_char) in right.iter().enumerate() {
            let next_cost = costs[j + 1];
            let mut cost = if left_char == right_char {
                last_cost
            } else {
                last_cost + 1
            };
            cost = cost.min(costs[j] + 1).min(next_cost + 1);
            costs[j + 1] = cost;
            last_cost = next_cost;
        }
    }

    costs[right.len()]
}
