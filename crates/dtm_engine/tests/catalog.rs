use dtm_core::BoundingBox;
use dtm_engine::{CatalogClient, CatalogError, CatalogSummary, FetchSettings};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn feature(name: &str, project: &str, size_gb: f64) -> serde_json::Value {
    json!({
        "attributes": {
            "Package": name,
            "Size_GB": size_gb,
            "Resolution": 0.5,
            "DownloadLink": format!("<a href=\"https://files.example.com/{name}.zip\">Download</a>"),
            "Project": project,
            "Shape__Area": 2_000_000.0
        },
        "geometry": { "rings": [[[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 0.0]]] }
    })
}

fn bbox() -> BoundingBox {
    BoundingBox::new(-8_850_000.0, 5_400_000.0, -8_830_000.0, 5_420_000.0, 3857)
}

fn client(server: &MockServer) -> CatalogClient {
    CatalogClient::new(&FetchSettings::default())
        .unwrap()
        .with_base_url(server.uri())
}

#[tokio::test]
async fn query_converts_features_and_skips_incomplete_ones() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(body_string_contains("esriGeometryEnvelope"))
        .and(body_string_contains("outSR=3857"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "features": [
                feature("GTA-A", "GTA 2014-18", 1.5),
                feature("GTA-B", "GTA 2023", 0.5),
                { "attributes": { "Package": "no-link", "Project": "GTA 2023" },
                  "geometry": { "rings": [] } }
            ]
        })))
        .mount(&server)
        .await;

    let tiles = client(&server).query_by_extent(&bbox()).await.unwrap();

    assert_eq!(
        tiles.iter().map(|t| t.tile_name.as_str()).collect::<Vec<_>>(),
        vec!["GTA-A", "GTA-B"]
    );
    assert_eq!(tiles[0].source_url, "https://files.example.com/GTA-A.zip");
    assert_eq!(tiles[0].vintage_hint.as_deref(), Some("2014-18"));
    assert_eq!(tiles[1].dataset_name, "GTA 2023");

    let summary = CatalogSummary::from_tiles(&tiles);
    assert_eq!(summary.tile_count, 2);
    assert_eq!(summary.projects, vec!["GTA 2014-18", "GTA 2023"]);
    assert_eq!(summary.total_size_bytes, 2_000_000_000);
}

#[tokio::test]
async fn full_pages_trigger_another_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(body_string_contains("resultOffset=0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "features": [feature("A", "Muskoka 2021", 1.0), feature("B", "Muskoka 2021", 1.0)]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(body_string_contains("resultOffset=2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "features": [feature("C", "Muskoka 2021", 1.0)]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tiles = client(&server)
        .with_page_size(2)
        .query_by_extent(&bbox())
        .await
        .unwrap();
    assert_eq!(tiles.len(), 3);
}

#[tokio::test]
async fn service_error_object_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": { "code": 400, "message": "Invalid geometry" }
        })))
        .mount(&server)
        .await;

    let err = client(&server).query_by_extent(&bbox()).await.unwrap_err();
    assert_eq!(
        err,
        CatalogError::Service {
            code: 400,
            message: "Invalid geometry".to_string()
        }
    );
}

#[tokio::test]
async fn http_and_parse_failures_are_distinguished() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let err = client(&server).query_by_extent(&bbox()).await.unwrap_err();
    assert_eq!(err, CatalogError::Status(503));

    let garbled = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&garbled)
        .await;
    let err = client(&garbled).query_by_extent(&bbox()).await.unwrap_err();
    assert!(matches!(err, CatalogError::Parse(_)));
}
