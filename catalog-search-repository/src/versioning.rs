//! Versioning-aware rewriting of tag criteria.
//!
//! Documents can be tagged with either the precise or the virtual identifier
//! of an entity. A tag criterion on one form is rewritten to also match the
//! other form, resolved through an [`EntityLookup`].

use std::sync::Arc;

use async_trait::async_trait;
use catalog_search_shared::{fields, Criterion, EntityUrn, PageRequest, SearchKey, StringMatchType};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::debug;

use crate::errors::SearchIndexError;
use crate::interfaces::EntityLookup;
use crate::service::SearchRepository;
use crate::types::VersionedEntity;

/// Rewrites tag criteria so that both identifier forms match.
///
/// `Not` nodes are left untouched: a negated tag is not expanded.
pub struct VersioningRewriter {
    lookup: Arc<dyn EntityLookup>,
    tags_field: String,
}

impl VersioningRewriter {
    pub fn new(lookup: Arc<dyn EntityLookup>) -> Self {
        Self {
            lookup,
            tags_field: fields::TAGS.to_string(),
        }
    }

    /// Use another field than `tags` to hold entity identifiers.
    pub fn with_tags_field(mut self, tags_field: impl Into<String>) -> Self {
        self.tags_field = tags_field.into();
        self
    }

    /// Return a rewritten copy of `criterion`.
    ///
    /// Identifiers that resolve to nothing are kept as they are. Lookup
    /// failures are returned.
    pub async fn rewrite(&self, criterion: &Criterion) -> Result<Criterion, SearchIndexError> {
        self.rewrite_node(criterion).await
    }

    fn rewrite_node<'a>(
        &'a self,
        criterion: &'a Criterion,
    ) -> BoxFuture<'a, Result<Criterion, SearchIndexError>> {
        async move {
            match criterion {
                Criterion::And(children) => Ok(Criterion::And(self.rewrite_all(children).await?)),
                Criterion::Or(children) => Ok(Criterion::Or(self.rewrite_all(children).await?)),
                Criterion::StringMatch {
                    field,
                    value,
                    match_type,
                    string_type,
                } if *field == self.tags_field && EntityUrn::is_urn(value) => {
                    match self.equivalent(value).await? {
                        Some(other) => {
                            debug!(tag = %value, equivalent = %other, "Expanded versioned tag");
                            Ok(Criterion::Or(vec![
                                criterion.clone(),
                                Criterion::StringMatch {
                                    field: field.clone(),
                                    value: other,
                                    match_type: *match_type,
                                    string_type: *string_type,
                                },
                            ]))
                        }
                        None => Ok(criterion.clone()),
                    }
                }
                Criterion::StringMatchAny {
                    field,
                    values,
                    match_type,
                    string_type,
                } if *field == self.tags_field => {
                    let mut expanded: Vec<String> = Vec::with_capacity(values.len() * 2);
                    for value in values {
                        push_unique(&mut expanded, value.clone());
                        if EntityUrn::is_urn(value) {
                            if let Some(other) = self.equivalent(value).await? {
                                push_unique(&mut expanded, other);
                            }
                        }
                    }
                    Ok(Criterion::StringMatchAny {
                        field: field.clone(),
                        values: expanded,
                        match_type: *match_type,
                        string_type: *string_type,
                    })
                }
                other => Ok(other.clone()),
            }
        }
        .boxed()
    }

    async fn rewrite_all(&self, children: &[Criterion]) -> Result<Vec<Criterion>, SearchIndexError> {
        let mut rewritten = Vec::with_capacity(children.len());
        for child in children {
            rewritten.push(self.rewrite_node(child).await?);
        }
        Ok(rewritten)
    }

    /// The other identifier form of `value`, if the entity is known.
    ///
    /// A precise identifier only has a virtual equivalent when it designates
    /// the latest version.
    async fn equivalent(&self, value: &str) -> Result<Option<String>, SearchIndexError> {
        let Ok(urn) = value.parse::<EntityUrn>() else {
            return Ok(None);
        };
        if urn.is_virtual() {
            let entity = self.lookup.lookup_by_virtual_id(&urn).await?;
            Ok(entity.map(|entity| entity.id.to_string()))
        } else {
            let entity = self.lookup.lookup_by_precise_id(&urn).await?;
            Ok(entity
                .filter(|entity| entity.last)
                .map(|entity| entity.virtual_id.to_string()))
        }
    }
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}

/// Entity lookup answered by searching an index of the repository.
///
/// Entities are stored with their precise identifier as document id, their
/// virtual identifier under `virtualId` and their latest-version flag under
/// `last`.
pub struct RepositoryEntityLookup {
    repository: Arc<SearchRepository>,
    index: String,
}

impl RepositoryEntityLookup {
    pub fn new(repository: Arc<SearchRepository>, index: impl AsRef<str>) -> Self {
        Self {
            repository,
            index: index.as_ref().to_lowercase(),
        }
    }
}

#[async_trait]
impl EntityLookup for RepositoryEntityLookup {
    async fn lookup_by_precise_id(
        &self,
        urn: &EntityUrn,
    ) -> Result<Option<VersionedEntity>, SearchIndexError> {
        let document = self
            .repository
            .get::<Value>(&self.index, &urn.to_string())
            .await?;
        document.map(|doc| decode_entity(&doc)).transpose()
    }

    async fn lookup_by_virtual_id(
        &self,
        urn: &EntityUrn,
    ) -> Result<Option<VersionedEntity>, SearchIndexError> {
        let key: SearchKey<Value> = SearchKey::new(&self.index, Vec::<String>::new());
        let criterion = Criterion::and(vec![
            Criterion::eq_str(fields::VIRTUAL_ID, urn.to_string(), StringMatchType::Keyword),
            Criterion::is_true(fields::LAST),
        ]);
        let page = self
            .repository
            .search_all_limited(&key, &criterion, &PageRequest::of(0, 1))
            .await?;
        page.content.first().map(decode_entity).transpose()
    }
}

fn decode_entity(document: &Value) -> Result<VersionedEntity, SearchIndexError> {
    let id: EntityUrn = document
        .get(fields::DOC_ID)
        .and_then(Value::as_str)
        .ok_or_else(|| SearchIndexError::parse("versioned entity without docId"))?
        .parse()
        .map_err(|e: catalog_search_shared::UrnError| SearchIndexError::parse(e.to_string()))?;
    let virtual_id = match document.get(fields::VIRTUAL_ID).and_then(Value::as_str) {
        Some(virtual_id) => virtual_id
            .parse()
            .map_err(|e: catalog_search_shared::UrnError| SearchIndexError::parse(e.to_string()))?,
        None => id.to_virtual(),
    };
    let last = document
        .get(fields::LAST)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok(VersionedEntity {
        id,
        virtual_id,
        last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_search_shared::MatchType;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const UUID: &str = "550e8400-e29b-41d4-a716-446655440000";

    fn precise(version: u32) -> EntityUrn {
        format!("URN:AIP:DATA:project1:{}:V{}", UUID, version)
            .parse()
            .unwrap()
    }

    fn virtual_urn() -> EntityUrn {
        format!("URN:AIP:DATA:project1:{}:LAST", UUID).parse().unwrap()
    }

    #[derive(Default)]
    struct MockLookup {
        entities: HashMap<String, VersionedEntity>,
        calls: AtomicUsize,
    }

    impl MockLookup {
        fn with_version(mut self, version: u32, last: bool) -> Self {
            let entity = VersionedEntity {
                id: precise(version),
                virtual_id: virtual_urn(),
                last,
            };
            self.entities.insert(precise(version).to_string(), entity);
            self
        }
    }

    #[async_trait]
    impl EntityLookup for MockLookup {
        async fn lookup_by_precise_id(
            &self,
            urn: &EntityUrn,
        ) -> Result<Option<VersionedEntity>, SearchIndexError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.entities.get(&urn.to_string()).cloned())
        }

        async fn lookup_by_virtual_id(
            &self,
            urn: &EntityUrn,
        ) -> Result<Option<VersionedEntity>, SearchIndexError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .entities
                .values()
                .find(|entity| entity.last && entity.virtual_id == *urn)
                .cloned())
        }
    }

    struct FailingLookup;

    #[async_trait]
    impl EntityLookup for FailingLookup {
        async fn lookup_by_precise_id(
            &self,
            _urn: &EntityUrn,
        ) -> Result<Option<VersionedEntity>, SearchIndexError> {
            Err(SearchIndexError::connection("backend down"))
        }

        async fn lookup_by_virtual_id(
            &self,
            _urn: &EntityUrn,
        ) -> Result<Option<VersionedEntity>, SearchIndexError> {
            Err(SearchIndexError::connection("backend down"))
        }
    }

    fn tag(value: &str) -> Criterion {
        Criterion::eq_str(fields::TAGS, value, StringMatchType::Keyword)
    }

    #[tokio::test]
    async fn test_virtual_tag_gets_precise_form() {
        let rewriter = VersioningRewriter::new(Arc::new(MockLookup::default().with_version(2, true)));
        let original = tag(&virtual_urn().to_string());

        let rewritten = rewriter.rewrite(&original).await.unwrap();

        assert_eq!(
            rewritten,
            Criterion::Or(vec![original, tag(&precise(2).to_string())])
        );
    }

    #[tokio::test]
    async fn test_last_precise_tag_gets_virtual_form() {
        let rewriter = VersioningRewriter::new(Arc::new(MockLookup::default().with_version(2, true)));
        let original = tag(&precise(2).to_string());

        let rewritten = rewriter.rewrite(&original).await.unwrap();

        assert_eq!(
            rewritten,
            Criterion::Or(vec![original, tag(&virtual_urn().to_string())])
        );
    }

    #[tokio::test]
    async fn test_old_version_and_misses_are_unchanged() {
        let rewriter = VersioningRewriter::new(Arc::new(
            MockLookup::default().with_version(1, false).with_version(2, true),
        ));

        let old = tag(&precise(1).to_string());
        assert_eq!(rewriter.rewrite(&old).await.unwrap(), old);

        let unknown = tag(&precise(9).to_string());
        assert_eq!(rewriter.rewrite(&unknown).await.unwrap(), unknown);
    }

    #[tokio::test]
    async fn test_not_and_other_fields_are_unchanged() {
        let lookup = Arc::new(MockLookup::default().with_version(2, true));
        let rewriter = VersioningRewriter::new(lookup.clone());

        let negated = Criterion::not(tag(&virtual_urn().to_string()));
        assert_eq!(rewriter.rewrite(&negated).await.unwrap(), negated);

        let other_field =
            Criterion::eq_str("label", virtual_urn().to_string(), StringMatchType::Keyword);
        assert_eq!(rewriter.rewrite(&other_field).await.unwrap(), other_field);

        let plain_tag = tag("not-an-urn");
        assert_eq!(rewriter.rewrite(&plain_tag).await.unwrap(), plain_tag);

        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_composites_are_rebuilt() {
        let rewriter = VersioningRewriter::new(Arc::new(MockLookup::default().with_version(2, true)));
        let criterion = Criterion::and(vec![
            Criterion::eq_int("count", 3),
            tag(&virtual_urn().to_string()),
        ]);

        let rewritten = rewriter.rewrite(&criterion).await.unwrap();

        assert_eq!(
            rewritten,
            Criterion::And(vec![
                Criterion::eq_int("count", 3),
                Criterion::Or(vec![
                    tag(&virtual_urn().to_string()),
                    tag(&precise(2).to_string())
                ]),
            ])
        );
    }

    #[tokio::test]
    async fn test_match_any_unions_values() {
        let rewriter = VersioningRewriter::new(Arc::new(MockLookup::default().with_version(2, true)));
        let criterion = Criterion::StringMatchAny {
            field: fields::TAGS.to_string(),
            values: vec![virtual_urn().to_string(), "plain".to_string(), precise(2).to_string()],
            match_type: MatchType::Equals,
            string_type: StringMatchType::Keyword,
        };

        let rewritten = rewriter.rewrite(&criterion).await.unwrap();

        assert_eq!(
            rewritten,
            Criterion::StringMatchAny {
                field: fields::TAGS.to_string(),
                values: vec![
                    virtual_urn().to_string(),
                    precise(2).to_string(),
                    "plain".to_string()
                ],
                match_type: MatchType::Equals,
                string_type: StringMatchType::Keyword,
            }
        );
    }

    #[tokio::test]
    async fn test_lookup_failure_propagates() {
        let rewriter = VersioningRewriter::new(Arc::new(FailingLookup));
        let result = rewriter.rewrite(&tag(&precise(2).to_string())).await;
        assert!(matches!(result, Err(SearchIndexError::ConnectionError(_))));
    }

    #[test]
    fn test_decode_entity_defaults_virtual_id() {
        let entity = decode_entity(&serde_json::json!({ "docId": precise(3).to_string() })).unwrap();
        assert_eq!(entity.virtual_id, virtual_urn());
        assert!(!entity.last);

        assert!(decode_entity(&serde_json::json!({ "docId": "bad" })).is_err());
    }
}
