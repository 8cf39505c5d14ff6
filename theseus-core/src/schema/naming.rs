use serde::Serialize;

/// Generated GraphQL names for a node, interface or union.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityNames {
    pub singular: String,
    pub plural: String,
    pub read: String,
    pub connection: String,
    pub aggregate: String,
    pub create: String,
    pub update: String,
    pub delete: String,
    pub where_input: String,
    pub create_input: String,
    pub update_input: String,
    pub connect_input: String,
    pub disconnect_input: String,
    pub delete_input: String,
    pub options: String,
    pub sort: String,
    pub connection_type: String,
    pub edge_type: String,
    pub aggregate_selection: String,
    pub create_response: String,
    pub update_response: String,
}

impl EntityNames {
    pub fn new(name: &str, plural_override: Option<&str>) -> Self {
        let singular = lower_first(name);
        let plural = match plural_override {
            Some(plural) => lower_first(plural),
            None => pluralize(&singular),
        };
        let pascal_plural = upper_first(&plural);
        Self {
            read: plural.clone(),
            connection: format!("{plural}Connection"),
            aggregate: format!("{plural}Aggregate"),
            create: format!("create{pascal_plural}"),
            update: format!("update{pascal_plural}"),
            delete: format!("delete{pascal_plural}"),
            where_input: format!("{name}Where"),
            create_input: format!("{name}CreateInput"),
            update_input: format!("{name}UpdateInput"),
            connect_input: format!("{name}ConnectInput"),
            disconnect_input: format!("{name}DisconnectInput"),
            delete_input: format!("{name}DeleteInput"),
            options: format!("{name}Options"),
            sort: format!("{name}Sort"),
            connection_type: format!("{pascal_plural}Connection"),
            edge_type: format!("{name}Edge"),
            aggregate_selection: format!("{name}AggregateSelection"),
            create_response: format!("Create{pascal_plural}MutationResponse"),
            update_response: format!("Update{pascal_plural}MutationResponse"),
            singular,
            plural,
        }
    }
}

/// Generated names for one relationship field of a source type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationshipNames {
    pub connection_field: String,
    pub aggregate_field: String,
    pub relationship_type: String,
    pub connection_type: String,
    pub connection_where: String,
    pub connect_field_input: String,
    pub disconnect_field_input: String,
    pub create_field_input: String,
    pub update_field_input: String,
    pub delete_field_input: String,
    pub connect_or_create_field_input: String,
    pub aggregate_input: String,
}

impl RelationshipNames {
    pub fn new(source: &str, field: &str) -> Self {
        let prefix = format!("{source}{}", upper_first(field));
        Self {
            connection_field: format!("{field}Connection"),
            aggregate_field: format!("{field}Aggregate"),
            relationship_type: format!("{prefix}Relationship"),
            connection_type: format!("{prefix}Connection"),
            connection_where: format!("{prefix}ConnectionWhere"),
            connect_field_input: format!("{prefix}ConnectFieldInput"),
            disconnect_field_input: format!("{prefix}DisconnectFieldInput"),
            create_field_input: format!("{prefix}CreateFieldInput"),
            update_field_input: format!("{prefix}UpdateFieldInput"),
            delete_field_input: format!("{prefix}DeleteFieldInput"),
            connect_or_create_field_input: format!("{prefix}ConnectOrCreateFieldInput"),
            aggregate_input: format!("{prefix}AggregateInput"),
        }
    }
}

pub fn lower_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn upper_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
];

/// English pluralization of the last camel-case word.
pub fn pluralize(word: &str) -> String {
    let split = word
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_uppercase())
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    let (head, tail) = word.split_at(split);
    let lower_tail = tail.to_lowercase();
    if let Some((_, plural)) = IRREGULAR.iter().find(|(single, _)| *single == lower_tail) {
        let plural = if tail.starts_with(char::is_uppercase) {
            upper_first(plural)
        } else {
            plural.to_string()
        };
        return format!("{head}{plural}");
    }

    let ends_with_consonant_y = lower_tail.ends_with('y')
        && !lower_tail
            .chars()
            .rev()
            .nth(1)
            .is_some_and(|c| "aeiou".contains(c));
    if ends_with_consonant_y && lower_tail.len() > 1 {
        format!("{}ies", &word[..word.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"]
        .iter()
        .any(|suffix| lower_tail.ends_with(suffix))
    {
        format!("{word}es")
    } else {
        format!("{word}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pluralizes_type_names() {
        assert_eq!(pluralize("movie"), "movies");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("boxOffice"), "boxOffices");
        assert_eq!(pluralize("address"), "addresses");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("person"), "people");
        assert_eq!(pluralize("salesPerson"), "salesPeople");
    }

    #[test]
    fn derives_operation_names() {
        let names = EntityNames::new("Movie", None);
        assert_eq!(names.read, "movies");
        assert_eq!(names.connection, "moviesConnection");
        assert_eq!(names.aggregate, "moviesAggregate");
        assert_eq!(names.create, "createMovies");
        assert_eq!(names.update, "updateMovies");
        assert_eq!(names.delete, "deleteMovies");
        assert_eq!(names.where_input, "MovieWhere");
        assert_eq!(names.create_response, "CreateMoviesMutationResponse");

        let names = EntityNames::new("Tech", Some("Techs"));
        assert_eq!(names.read, "techs");
        assert_eq!(names.create, "createTechs");
    }

    #[test]
    fn derives_relationship_names() {
        let names = RelationshipNames::new("Movie", "actors");
        assert_eq!(names.connection_field, "actorsConnection");
        assert_eq!(names.connect_field_input, "MovieActorsConnectFieldInput");
        assert_eq!(names.disconnect_field_input, "MovieActorsDisconnectFieldInput");
        assert_eq!(names.relationship_type, "MovieActorsRelationship");
    }
}
