//! Prompt construction.
//!
//! The prompt is the single channel through which schema and safety
//! constraints reach the model; its output is otherwise untrusted. Pure
//! string assembly, no I/O. A missing or empty snapshot degrades to an empty
//! schema block rather than failing.

use crate::schema::DatabaseSnapshot;

/// Collections rendered into one prompt before the block is cut off.
const MAX_COLLECTIONS: usize = 12;
/// Fields rendered per collection.
const MAX_FIELDS: usize = 25;

/// Closed multilingual vocabulary: search term -> candidate field names.
/// Rendered as hints, not hard rules; the schema block wins on conflict.
const VOCABULARY: &[(&str, &str)] = &[
    ("user, users, utilisateur, utilisateurs, usuario, usuarios", "users"),
    ("name, nom, nombre", "name, firstName, lastName, username"),
    ("email, courriel, e-mail, correo", "email, mail"),
    ("age, âge, edad", "age"),
    ("price, prix, precio, cost, coût", "price, amount, total"),
    ("date, fecha, created, créé", "createdAt, created, date, updatedAt"),
    ("status, statut, estado", "status, state"),
    ("order, orders, commande, commandes, pedido, pedidos", "orders"),
    ("product, produit, producto", "products"),
];

pub struct ContextComposer;

impl ContextComposer {
    /// Builds the full prompt: schema context, vocabulary hints, safety
    /// rules, worked examples, and the user's literal text last.
    pub fn compose(
        snapshot: Option<&DatabaseSnapshot>,
        user_text: &str,
        preview_limit: i64,
    ) -> String {
        let mut s = String::new();
        s.push_str(
            "You are a translator from natural language (any language) to MongoDB operations.\n\
             Respond with ONLY a single JSON object. No prose, no markdown fences, no comments.\n\n",
        );

        Self::push_schema_block(&mut s, snapshot);
        Self::push_vocabulary(&mut s);
        Self::push_rules(&mut s, preview_limit);
        Self::push_examples(&mut s);

        s.push_str("User request:\n");
        s.push_str(user_text);
        s.push('\n');
        s
    }

    fn push_schema_block(s: &mut String, snapshot: Option<&DatabaseSnapshot>) {
        let snapshot = match snapshot {
            Some(snap) if !snap.is_empty() => snap,
            _ => {
                s.push_str("No schema information is available; infer collection and field names from the request.\n\n");
                return;
            }
        };

        s.push_str(&format!(
            "Database \"{}\" - available collections: {}\n\n",
            snapshot.database,
            snapshot.collection_names().join(", ")
        ));

        for collection in snapshot.collections.iter().take(MAX_COLLECTIONS) {
            s.push_str(&format!(
                "Collection \"{}\" ({} documents):\n",
                collection.name, collection.document_count
            ));
            for (field, profile) in collection.fields.iter().take(MAX_FIELDS) {
                let tags: Vec<&str> = profile.types.iter().map(|t| t.tag()).collect();
                match &profile.sample {
                    Some(sample) => s.push_str(&format!(
                        "  - {} [{}] e.g. {}\n",
                        field,
                        tags.join("|"),
                        sample
                    )),
                    None => s.push_str(&format!("  - {} [{}]\n", field, tags.join("|"))),
                }
            }
            if collection.fields.len() > MAX_FIELDS {
                s.push_str(&format!(
                    "  … and {} more fields\n",
                    collection.fields.len() - MAX_FIELDS
                ));
            }
            let unique: Vec<&str> = collection
                .indexes
                .iter()
                .filter(|i| i.unique && i.name != "_id_")
                .map(|i| i.name.as_str())
                .collect();
            if !unique.is_empty() {
                s.push_str(&format!("  unique indexes: {}\n", unique.join(", ")));
            }
            s.push('\n');
        }
        if snapshot.collections.len() > MAX_COLLECTIONS {
            s.push_str(&format!(
                "… and {} more collections\n\n",
                snapshot.collections.len() - MAX_COLLECTIONS
            ));
        }
    }

    fn push_vocabulary(s: &mut String) {
        s.push_str("Vocabulary hints (terms users may use -> candidate collection/field names; hints only, prefer names present in the schema above):\n");
        for (terms, candidates) in VOCABULARY {
            s.push_str(&format!("  - {} -> {}\n", terms, candidates));
        }
        s.push('\n');
    }

    fn push_rules(s: &mut String, preview_limit: i64) {
        s.push_str("Rules (non-negotiable):\n");
        s.push_str("1. \"action\" must be one of: find, insert, update, delete, aggregate.\n");
        s.push_str("2. NEVER produce a delete or update with an empty or missing \"query\" filter. If the request would affect a whole collection, still emit the action with the most specific filter the request allows; it will be rejected if the filter is empty.\n");
        s.push_str("3. Sort directions are exactly 1 (ascending) or -1 (descending).\n");
        s.push_str("4. For text matching use {\"$regex\": \"...\", \"$options\": \"i\"} (case-insensitive).\n");
        s.push_str("5. In projections, exclude \"_id\" unless the user explicitly asks for it.\n");
        s.push_str(&format!(
            "6. For reads, include {{\"options\": {{\"limit\": N}}}} when the user names a count; otherwise it defaults to {}.\n\n",
            preview_limit
        ));
    }

    fn push_examples(s: &mut String) {
        s.push_str("Examples:\n");
        s.push_str("Input: Find all users\n");
        s.push_str("Output: {\"action\":\"find\",\"collection\":\"users\",\"query\":{}}\n\n");
        s.push_str("Input: Trouve les utilisateurs de plus de 30 ans, triés par âge décroissant\n");
        s.push_str("Output: {\"action\":\"find\",\"collection\":\"users\",\"query\":{\"age\":{\"$gt\":30}},\"options\":{\"sort\":{\"age\":-1}}}\n\n");
        s.push_str("Input: Busca productos cuyo nombre contenga \"silla\"\n");
        s.push_str("Output: {\"action\":\"find\",\"collection\":\"products\",\"query\":{\"name\":{\"$regex\":\"silla\",\"$options\":\"i\"}}}\n\n");
        s.push_str("Input: Add a new user named Ada with email ada@example.com\n");
        s.push_str("Output: {\"action\":\"insert\",\"collection\":\"users\",\"documents\":[{\"name\":\"Ada\",\"email\":\"ada@example.com\"}]}\n\n");
        s.push_str("Input: Mark order 4521 as shipped\n");
        s.push_str("Output: {\"action\":\"update\",\"collection\":\"orders\",\"query\":{\"orderId\":4521},\"update\":{\"$set\":{\"status\":\"shipped\"}}}\n\n");
        s.push_str("Input: Delete the user with email mark@example.com\n");
        s.push_str("Output: {\"action\":\"delete\",\"collection\":\"users\",\"query\":{\"email\":\"mark@example.com\"}}\n\n");
        s.push_str("Input: How many orders per status?\n");
        s.push_str("Output: {\"action\":\"aggregate\",\"collection\":\"orders\",\"pipeline\":[{\"$group\":{\"_id\":\"$status\",\"count\":{\"$sum\":1}}}]}\n\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{profile_sample, CollectionSchema, DatabaseSnapshot};
    use chrono::Utc;
    use mongodb::bson::doc;

    fn snapshot() -> DatabaseSnapshot {
        DatabaseSnapshot {
            database: "shop".into(),
            collections: vec![CollectionSchema {
                name: "users".into(),
                fields: profile_sample(&[doc! { "name": "Ada", "age": 36 }]),
                indexes: vec![],
                document_count: 2,
            }],
            scanned_at: Utc::now(),
            total_documents: 2,
        }
    }

    #[test]
    fn user_text_comes_last() {
        let prompt = ContextComposer::compose(Some(&snapshot()), "find everything", 50);
        let rules_pos = prompt.find("Rules").unwrap();
        let text_pos = prompt.rfind("find everything").unwrap();
        assert!(text_pos > rules_pos);
        assert!(prompt.trim_end().ends_with("find everything"));
    }

    #[test]
    fn schema_fields_and_tags_are_rendered() {
        let prompt = ContextComposer::compose(Some(&snapshot()), "x", 50);
        assert!(prompt.contains("Collection \"users\" (2 documents)"));
        assert!(prompt.contains("age [integer]"));
        assert!(prompt.contains("name [string]"));
    }

    #[test]
    fn missing_snapshot_degrades_to_empty_context() {
        let prompt = ContextComposer::compose(None, "find all users", 50);
        assert!(prompt.contains("No schema information is available"));
        assert!(prompt.contains("find all users"));
    }

    #[test]
    fn every_action_verb_has_a_worked_example() {
        let prompt = ContextComposer::compose(None, "x", 50);
        for verb in ["find", "insert", "update", "delete", "aggregate"] {
            assert!(
                prompt.contains(&format!("{{\"action\":\"{verb}\"")),
                "no example for {verb}"
            );
        }
    }

    #[test]
    fn preview_limit_is_stated_in_the_rules() {
        let prompt = ContextComposer::compose(None, "x", 25);
        assert!(prompt.contains("defaults to 25"));
    }
}
