use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Json, Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;

use super::{json_body, query_params};
use crate::error::AppResult;
use crate::index::filter::{SearchParams, SearchRequest};
use crate::middleware::{auth::CurrentUser, ip::MaybeRemoteAddr, validation::parse_item_id};
use crate::state::AppState;
use crate::types::{ItemDraft, ItemPatch, StatusChangeRequest};

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page_token: Option<String>,
    pub limit: Option<u32>,
}

pub async fn create_item(
    State(state): State<AppState>,
    remote: MaybeRemoteAddr,
    headers: HeaderMap,
    CurrentUser(user): CurrentUser,
    body: Result<Json<ItemDraft>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    state.rate_limiter.check_endpoint_limit("POST /items", remote.client_ip(&headers)).await?;
    let draft = json_body(body)?;
    let item = state.catalog.create_item(&user, draft).await?;
    let location = format!("/items/{}", item.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(item)))
}

pub async fn search_items(
    State(state): State<AppState>,
    remote: MaybeRemoteAddr,
    headers: HeaderMap,
    query: Result<Query<SearchParams>, QueryRejection>,
) -> AppResult<impl IntoResponse> {
    state.rate_limiter.check_endpoint_limit("GET /items", remote.client_ip(&headers)).await?;
    let req = SearchRequest::try_from(query_params(query)?)?;
    let page = state.catalog.search(&req).await?;
    Ok(Json(page))
}

pub async fn my_items(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    query: Result<Query<PageParams>, QueryRejection>,
) -> AppResult<impl IntoResponse> {
    let page = query_params(query)?;
    let items = state.catalog.list_owner_items(&user, page.page_token, page.limit).await?;
    Ok(Json(items))
}

pub async fn get_item(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<impl IntoResponse> {
    let item = state.catalog.get_item(parse_item_id(&id)?).await?;
    Ok(Json(item))
}

pub async fn update_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    CurrentUser(user): CurrentUser,
    body: Result<Json<ItemPatch>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let id = parse_item_id(&id)?;
    let item = state.catalog.update_item(&user, id, json_body(body)?).await?;
    Ok(Json(item))
}

pub async fn change_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    CurrentUser(user): CurrentUser,
    body: Result<Json<StatusChangeRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let id = parse_item_id(&id)?;
    let item = state.catalog.transition_status(&user, id, json_body(body)?).await?;
    Ok(Json(item))
}

pub async fn delete_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    CurrentUser(user): CurrentUser,
) -> AppResult<impl IntoResponse> {
    state.catalog.delete_item(&user, parse_item_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}
