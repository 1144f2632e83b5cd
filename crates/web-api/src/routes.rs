use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use application::{
    ChangeMembersRequest, CreateRoomRequest, HistoryPage, RoomDto, RoomSession, UserDto,
};
use domain::{RoomId, User, UserId, Username};

use crate::{auth::LoginResponse, error::ApiError, state::AppState, ws_connection};

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    username: String,
}

#[derive(Debug, Deserialize)]
struct CreateRoomPayload {
    room_name: Option<String>,
    #[serde(default)]
    user_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
struct MembersPayload {
    user_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    cursor: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/chat/{room_id}/", get(chat_socket))
        .nest("/api/v1", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(register_user))
        .route("/rooms", get(list_rooms).post(create_room))
        .route(
            "/rooms/{room_id}/members",
            post(add_members).delete(remove_members),
        )
        .route("/rooms/{room_id}/messages", get(get_history))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// 校验 bearer token，并确认用户仍然存在
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(headers)?;
    state
        .users
        .find_by_id(user_id)
        .await
        .map_err(application::ApplicationError::from)?
        .ok_or_else(|| ApiError::unauthorized("unknown user"))
}

fn user_ids(ids: Vec<Uuid>) -> Vec<UserId> {
    ids.into_iter().map(UserId::from).collect()
}

/// 签发身份：外部认证服务的最小替身，供本地运行和集成测试使用
async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<LoginResponse>), ApiError> {
    let username = Username::parse(payload.username).map_err(application::ApplicationError::from)?;
    let user = User::new(UserId::from(Uuid::new_v4()), username, state.clock.now());
    let user = state
        .users
        .create(user)
        .await
        .map_err(application::ApplicationError::from)?;
    let token = state.jwt_service.generate_token(user.id)?;

    tracing::info!(user_id = %user.id, username = %user.username, "注册用户");
    Ok((
        StatusCode::CREATED,
        Json(LoginResponse {
            user: UserDto::from(&user),
            token,
        }),
    ))
}

async fn list_rooms(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<RoomDto>>, ApiError> {
    authenticate(&state, &headers).await?;
    let rooms = state.room_service.list_rooms().await?;
    Ok(Json(rooms.iter().map(RoomDto::from).collect()))
}

async fn create_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateRoomPayload>,
) -> Result<(StatusCode, Json<RoomDto>), ApiError> {
    let user = authenticate(&state, &headers).await?;
    let room = state
        .room_service
        .create_room(CreateRoomRequest {
            creator_id: user.id,
            room_name: payload.room_name,
            member_ids: user_ids(payload.user_ids),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(RoomDto::from(&room))))
}

async fn add_members(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
    Json(payload): Json<MembersPayload>,
) -> Result<StatusCode, ApiError> {
    let user = authenticate(&state, &headers).await?;
    state
        .room_service
        .add_members(ChangeMembersRequest {
            room_id: RoomId::from(room_id),
            operator_id: user.id,
            user_ids: user_ids(payload.user_ids),
        })
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn remove_members(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
    Json(payload): Json<MembersPayload>,
) -> Result<StatusCode, ApiError> {
    let user = authenticate(&state, &headers).await?;
    state
        .room_service
        .remove_members(ChangeMembersRequest {
            room_id: RoomId::from(room_id),
            operator_id: user.id,
            user_ids: user_ids(payload.user_ids),
        })
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn get_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryPage>, ApiError> {
    authenticate(&state, &headers).await?;
    let page = state
        .room_service
        .history(&RoomId::from(room_id), query.cursor.as_deref())
        .await?;

    Ok(Json(page))
}

/// 房间、凭证、成员资格都通过后才升级；非成员先接受再以 4001 关闭
async fn chat_socket(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let room_id = RoomId::from(room_id);
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match RoomSession::authorize(state.sessions.clone(), &room_id, authorization).await {
        Ok(session) => Ok(ws.on_upgrade(move |socket| ws_connection::serve(socket, session))),
        Err(rejection) => match rejection.close_code() {
            Some(code) => {
                Ok(ws.on_upgrade(move |socket| ws_connection::reject(socket, code)))
            }
            None => {
                tracing::info!(room_id = %room_id, reason = %rejection, "拒绝 WebSocket 连接");
                Err(ApiError::from(rejection))
            }
        },
    }
}
