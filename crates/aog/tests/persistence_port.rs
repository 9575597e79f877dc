//! Persistence port semantics: list filters, pagination, sorting, upserts

mod common;

use aog::database::repositories::{DataStore, FilterClause, ListParams, SortOrder};
use aog::models::{
    AuthType, ProviderScope, ProviderStatus, ServiceProvider, ServiceSource,
};
use chrono::Utc;

fn provider(name: &str, service: &str, source: ServiceSource) -> ServiceProvider {
    ServiceProvider {
        provider_name: name.into(),
        service_name: service.into(),
        service_source: source,
        flavor: "openai".into(),
        desc: String::new(),
        method: "POST".into(),
        url: format!("https://api.example.com/{name}"),
        auth_type: AuthType::None,
        auth_key: String::new(),
        extra_headers: String::new(),
        extra_body: String::new(),
        properties: String::new(),
        status: ProviderStatus::Unknown,
        scope: ProviderScope::User,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn list_supports_filters_sorting_and_pagination() {
    let (_root, state) = common::test_state().await;
    let repo = &state.repos.providers;

    for index in 0..5 {
        repo.add(provider(
            &format!("remote_chat_{index}"),
            "chat",
            ServiceSource::Remote,
        ))
        .await
        .unwrap();
    }
    repo.add(provider("remote_embed_0", "embed", ServiceSource::Remote))
        .await
        .unwrap();

    // Exact-equal filter.
    let chat_only = repo
        .list(&ListParams::filtered(vec![ListParams::eq("service_name", "chat")]))
        .await
        .unwrap();
    assert_eq!(chat_only.len(), 5);

    // Substring filter.
    let embed = repo
        .list(&ListParams::filtered(vec![FilterClause::Like {
            field: "provider_name".into(),
            value: "embed".into(),
        }]))
        .await
        .unwrap();
    assert_eq!(embed.len(), 1);
    assert_eq!(embed[0].provider_name, "remote_embed_0");

    // IN filter.
    let subset = repo
        .list(&ListParams::filtered(vec![FilterClause::In {
            field: "provider_name".into(),
            values: vec!["remote_chat_0".into(), "remote_chat_3".into()],
        }]))
        .await
        .unwrap();
    assert_eq!(subset.len(), 2);

    // Sorted descending, paginated two per page.
    let page = repo
        .list(&ListParams {
            page: Some(2),
            page_size: Some(2),
            sort_by: Some("provider_name".into()),
            order: SortOrder::Desc,
            filters: vec![ListParams::eq("service_name", "chat")],
        })
        .await
        .unwrap();
    let names: Vec<_> = page.iter().map(|p| p.provider_name.as_str()).collect();
    assert_eq!(names, vec!["remote_chat_2", "remote_chat_1"]);

    // Count honors filters.
    assert_eq!(
        repo.count(&[ListParams::eq("service_name", "chat")]).await.unwrap(),
        5
    );
    assert_eq!(repo.count(&[]).await.unwrap(), 6);
}

#[tokio::test]
async fn put_refreshes_updated_at_and_keeps_non_empty_fields() {
    let (_root, state) = common::test_state().await;
    let repo = &state.repos.providers;

    let created = repo
        .add(provider("remote_chat", "chat", ServiceSource::Remote))
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let mut update = created.clone();
    update.url = String::new();
    update.desc = "freshly described".into();
    let updated = repo.put(update).await.unwrap();

    assert_eq!(updated.url, created.url, "empty url must not clear stored value");
    assert_eq!(updated.desc, "freshly described");
    assert!(updated.updated_at > created.updated_at, "updated_at must refresh");
    assert_eq!(updated.created_at, created.created_at);
}

#[tokio::test]
async fn is_exist_and_delete_behave_for_missing_rows() {
    let (_root, state) = common::test_state().await;
    let repo = &state.repos.providers;

    assert!(!repo.is_exist("nope").await.unwrap());
    // Deleting a missing provider is a no-op, not an error.
    repo.delete("nope").await.unwrap();

    repo.add(provider("p", "chat", ServiceSource::Remote)).await.unwrap();
    assert!(repo.is_exist("p").await.unwrap());
    repo.delete("p").await.unwrap();
    assert!(!repo.is_exist("p").await.unwrap());
}
