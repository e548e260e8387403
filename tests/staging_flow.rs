use graphql_staging_engine::engine::StagingEngine;
use graphql_staging_engine::{ChunkPriority, ChunkRule, EngineConfig, StagingError};
use serde_json::json;
use std::sync::Once;

static INIT: Once = Once::new();

fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

#[tokio::test]
async fn test_staging_and_querying_a_nested_document() {
    init_test_logging();

    // Given: an engine and a nested document with an entity relationship
    let engine = StagingEngine::default();
    let access_id = StagingEngine::mint_access_id();
    let document = json!({
        "data": {
            "genes": [
                {
                    "id": 12,
                    "name": "BRAF",
                    "symbol": "BRAF",
                    "variants": [
                        {"id": 1, "name": "V600E", "hgvs": "p.V600E"},
                        {"id": 2, "name": "V600K", "hgvs": "p.V600K"}
                    ]
                }
            ]
        }
    });

    // When: staging the document
    let response = engine.process(&access_id, &document).await;

    // Then: both entity tables and the junction table are populated
    assert!(response.success, "{}", response.message);
    assert_eq!(response.schemas["gene"].row_count, 1);
    assert_eq!(response.schemas["variant"].row_count, 2);
    assert_eq!(response.schemas["gene_variant"].row_count, 2);

    // And: the junction carries the sorted-pair columns
    let pairs = engine
        .query(
            &access_id,
            "SELECT gene_id, variant_id FROM gene_variant ORDER BY variant_id",
        )
        .await
        .expect("query");
    assert!(pairs.success, "{:?}", pairs.error);
    assert_eq!(pairs.row_count, 2);
    assert_eq!(pairs.results[0]["gene_id"], 12);
    assert_eq!(pairs.results[0]["variant_id"], 1);
    assert_eq!(pairs.results[1]["variant_id"], 2);
}

#[tokio::test]
async fn test_restaging_the_same_document_does_not_duplicate_rows() {
    init_test_logging();

    // Given: a dataset that has already staged a document
    let engine = StagingEngine::default();
    let access_id = StagingEngine::mint_access_id();
    let document = json!({"data": {"genes": [{"id": 1, "name": "TP53", "symbol": "TP53"}]}});
    engine.process(&access_id, &document).await;

    // When: staging the identical document again
    let second = engine.process(&access_id, &document).await;

    // Then: explicit-id rows are not duplicated
    assert!(second.success);
    assert_eq!(second.schemas["gene"].row_count, 1);
}

#[tokio::test]
async fn test_destructive_sql_is_rejected_and_data_survives() {
    init_test_logging();

    // Given: a dataset with one staged row
    let engine = StagingEngine::default();
    let access_id = StagingEngine::mint_access_id();
    engine
        .process(
            &access_id,
            &json!({"data": {"genes": [{"id": 1, "name": "TP53", "symbol": "TP53"}]}}),
        )
        .await;

    // When: attempting destructive statements
    for sql in [
        "DELETE FROM gene",
        "DROP TABLE gene",
        "UPDATE gene SET name = 'x'",
        "INSERT INTO gene VALUES (9, 'x', 'x')",
        "SELECT 1; DROP TABLE gene;",
    ] {
        let response = engine.query(&access_id, sql).await.expect("query");
        assert!(!response.success, "should reject: {sql}");
        assert!(response.error.is_some());
    }

    // Then: the staged row is untouched
    let rows = engine
        .query(&access_id, "SELECT COUNT(*) AS n FROM gene")
        .await
        .expect("query");
    assert!(rows.success);
    assert_eq!(rows.results[0]["n"], 1);
}

#[tokio::test]
async fn test_cte_pragma_and_temp_tables_are_allowed() {
    init_test_logging();

    let engine = StagingEngine::default();
    let access_id = StagingEngine::mint_access_id();
    engine
        .process(
            &access_id,
            &json!({"data": {"genes": [{"id": 1, "name": "TP53", "symbol": "TP53"}]}}),
        )
        .await;

    let cte = engine
        .query(
            &access_id,
            "WITH g AS (SELECT name FROM gene) SELECT * FROM g",
        )
        .await
        .expect("query");
    assert!(cte.success, "{:?}", cte.error);
    assert_eq!(cte.query_type.as_deref(), Some("cte"));

    let pragma = engine
        .query(&access_id, "PRAGMA table_info(gene)")
        .await
        .expect("query");
    assert!(pragma.success);
    assert!(pragma.row_count >= 2);

    let temp = engine
        .query(&access_id, "CREATE TEMP TABLE scratch AS SELECT * FROM gene")
        .await
        .expect("query");
    assert!(temp.success, "{:?}", temp.error);

    let read_back = engine
        .query(&access_id, "SELECT COUNT(*) AS n FROM scratch")
        .await
        .expect("query");
    assert!(read_back.success);
    assert_eq!(read_back.results[0]["n"], 1);
}

#[tokio::test]
async fn test_oversized_field_round_trips_through_chunk_storage() {
    init_test_logging();

    // Given: a config that always chunks the description column
    let mut config = EngineConfig::default();
    config.chunking.piece_size = 16;
    config.chunking.rules.push(ChunkRule {
        table: None,
        column: "description".to_string(),
        priority: ChunkPriority::Always,
        threshold: None,
    });
    let engine = StagingEngine::new(config);
    let access_id = StagingEngine::mint_access_id();
    let long_text = "x".repeat(100);

    // When: staging an entity with the oversized field and reading it back
    let response = engine
        .process(
            &access_id,
            &json!({"data": {"genes": [
                {"id": 1, "name": "TP53", "description": long_text.clone()}
            ]}}),
        )
        .await;
    assert!(response.success, "{}", response.message);

    let rows = engine
        .query(&access_id, "SELECT description FROM gene")
        .await
        .expect("query");

    // Then: the caller sees the full value, flagged as resolved
    assert!(rows.success, "{:?}", rows.error);
    assert_eq!(rows.results[0]["description"], json!(long_text));
    assert!(rows.chunked_content_resolved);
}

#[tokio::test]
async fn test_restaging_a_changed_chunked_value_keeps_the_table_readable() {
    init_test_logging();

    // Given: a config that always chunks descriptions, and a staged gene
    let mut config = EngineConfig::default();
    config.chunking.piece_size = 8;
    config.chunking.rules.push(ChunkRule {
        table: None,
        column: "description".to_string(),
        priority: ChunkPriority::Always,
        threshold: None,
    });
    let engine = StagingEngine::new(config);
    let access_id = StagingEngine::mint_access_id();
    let first = "a".repeat(40);
    let second = "b".repeat(200);
    engine
        .process(
            &access_id,
            &json!({"data": {"genes": [{"id": 1, "name": "TP53", "description": first}]}}),
        )
        .await;

    // When: restaging the same id with a different oversized value
    let restage = engine
        .process(
            &access_id,
            &json!({"data": {"genes": [{"id": 1, "name": "TP53", "description": second}]}}),
        )
        .await;
    assert!(restage.success, "{}", restage.message);

    // Then: the table stays readable and resolves to the stored pieces
    let rows = engine
        .query(&access_id, "SELECT description FROM gene")
        .await
        .expect("query");
    assert!(rows.success, "{:?}", rows.error);
    assert_eq!(rows.row_count, 1);
    assert_eq!(rows.results[0]["description"], json!(second));
}

#[tokio::test]
async fn test_pagination_analysis_is_surfaced_in_the_process_response() {
    init_test_logging();

    let engine = StagingEngine::default();
    let access_id = StagingEngine::mint_access_id();
    let response = engine
        .process(
            &access_id,
            &json!({
                "data": {
                    "genes": {
                        "totalCount": 300,
                        "pageInfo": {"hasNextPage": true, "endCursor": "abc"},
                        "edges": [
                            {"node": {"id": 1, "name": "TP53", "symbol": "TP53"}},
                            {"node": {"id": 2, "name": "BRCA1", "symbol": "BRCA1"}}
                        ]
                    }
                }
            }),
        )
        .await;

    assert!(response.success, "{}", response.message);
    let pagination = response.pagination.expect("pagination");
    assert_eq!(pagination.has_next_page, Some(true));
    assert_eq!(pagination.total_count, Some(300));
    assert_eq!(pagination.current_count, 2);
    let suggestion = pagination.suggestion.expect("suggestion");
    assert!(suggestion.contains("abc"));

    // And: the connection wrapper itself is not staged as a table
    assert!(response.schemas.contains_key("gene"));
    assert!(!response.schemas.contains_key("edges"));
    assert!(!response.schemas.contains_key("page_info"));
}

#[tokio::test]
async fn test_non_entity_documents_land_in_fallback_tables() {
    init_test_logging();

    let engine = StagingEngine::default();
    let access_id = StagingEngine::mint_access_id();

    // A flat object with no entity shape lands in root_object
    let flat = engine.process(&access_id, &json!({"total": 42})).await;
    assert!(flat.success, "{}", flat.message);
    let rows = engine
        .query(&access_id, "SELECT total FROM root_object")
        .await
        .expect("query");
    assert!(rows.success);
    assert_eq!(rows.results[0]["total"], 42);

    // A bare scalar lands in scalar_data
    let scalar = engine.process(&access_id, &json!("hello")).await;
    assert!(scalar.success, "{}", scalar.message);
    let rows = engine
        .query(&access_id, "SELECT value FROM scalar_data")
        .await
        .expect("query");
    assert!(rows.success);
    assert_eq!(rows.results[0]["value"], "hello");
}

#[tokio::test]
async fn test_schema_reflects_tables_and_unknown_ids_fail_cleanly() {
    init_test_logging();

    let engine = StagingEngine::default();
    let access_id = StagingEngine::mint_access_id();
    engine
        .process(
            &access_id,
            &json!({"data": {"genes": [{"id": 1, "name": "TP53", "symbol": "TP53"}]}}),
        )
        .await;

    // Schema introspection covers the staged table
    let schema = engine.schema(&access_id).await.expect("schema");
    assert_eq!(schema.table_count, 1);
    assert_eq!(schema.total_rows, 1);
    let gene = &schema.tables["gene"];
    assert!(gene.columns.iter().any(|c| c.name == "id" && c.primary_key));
    assert_eq!(gene.sample_data.len(), 1);

    // Deletion frees the id; later calls report not-found
    assert!(engine.delete(&access_id).await);
    let err = engine
        .query(&access_id, "SELECT 1")
        .await
        .expect_err("deleted dataset");
    assert!(matches!(err, StagingError::DatasetNotFound { .. }));
    assert!(!engine.delete(&access_id).await);
}
