use std::{error::Error, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        request, HeaderValue, Method, StatusCode,
    },
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, RequestPartsExt as _, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use derive_more::From;
use futures::{stream, Stream};
use itertools::Itertools as _;
use jsonwebtoken::{
    decode, encode, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::{fs, net, sync::broadcast, task};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{
    layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

use passflow::{api, db, dispatch, metrics, notify, Config};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = fs::read_to_string("config.toml").await?;
    let config = toml::from_str::<Config>(&config)?;

    let (db_client, db_connection) = db::connect(config.db).await?;
    let db_client = Arc::new(db_client);

    task::spawn(async move {
        if let Err(e) = db_connection.await {
            panic!("database connection failed: {e}");
        }
    });

    let bus = notify::Bus::new(16);

    // Reconciles claims performed by other processes sharing the store
    // into the local broadcast. Aborted when dropped at shutdown.
    let _poller = notify::Poller::spawn(
        Arc::clone(&db_client),
        bus.clone(),
        config.display.poll_interval,
    );

    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);
    for origin in &config.http.cors.allowed_origins {
        cors = cors.allow_origin(origin.parse::<HeaderValue>()?);
    }

    let app = Router::new()
        .route("/auth", post(auth))
        .route("/user", get(get_user).patch(edit_user))
        .route("/ticket", get(list_waiting_tickets).post(issue_ticket))
        .route("/ticket/next", post(claim_next))
        .route("/ticket/:id", get(get_ticket).patch(edit_ticket))
        .route("/queue/reset", post(reset_queue))
        .route("/calls", get(list_calls))
        .route("/calls/subscribe", get(subscribe_calls))
        .route("/metrics", get(get_metrics))
        .layer(cors)
        .with_state(Arc::new(AppState {
            db_client,
            bus,
            call_history_size: config.display.history_size,
            jwt_expiration_time: config.jwt.expiration_time,
            jwt_decoding_key: DecodingKey::from_secret(
                config.jwt.secret.as_bytes(),
            ),
            jwt_encoding_key: EncodingKey::from_secret(
                config.jwt.secret.as_bytes(),
            ),
        }));

    let listener = net::TcpListener::bind(config.http.server.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct AuthInput {
    login: String,
    password: String,
}

async fn auth(
    State(state): State<SharedAppState>,
    Json(AuthInput { login, password }): Json<AuthInput>,
) -> Result<String, AuthError> {
    use AuthError as E;

    let password_hash = api::user::PasswordHash::new(&password);

    let user = state
        .db_client
        .get_user_by_login(&login)
        .await?
        .filter(|u| u.password_hash == password_hash)
        .ok_or(E::WrongLoginOrPassword)?;

    let expires_at = OffsetDateTime::now_utc() + state.jwt_expiration_time;
    encode(
        &Header::default(),
        &AuthClaims {
            user_id: user.id,
            exp: expires_at.unix_timestamp(),
        },
        &state.jwt_encoding_key,
    )
    .map_err(|_| E::InvalidToken)
}

#[derive(Debug, From)]
pub enum AuthError {
    #[from]
    DbError(db::Error),
    InvalidToken,
    WrongLoginOrPassword,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::WrongLoginOrPassword => StatusCode::FORBIDDEN,
        }
        .into_response()
    }
}

async fn get_user(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
) -> Result<Json<api::User>, GetUserError> {
    use GetUserError as E;

    let my = state
        .db_client
        .get_user_by_id(auth_claims.user_id)
        .await?
        .ok_or(E::UserNotFound)?;

    Ok(Json(my.into()))
}

#[derive(Debug, From)]
pub enum GetUserError {
    #[from]
    DbError(db::Error),
    UserNotFound,
}

impl IntoResponse for GetUserError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(_) | Self::UserNotFound => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
        .into_response()
    }
}

#[derive(Deserialize)]
#[serde(content = "data", rename_all = "camelCase", tag = "op")]
enum EditUserInput {
    SetAvailability {
        availability: api::user::Availability,
        message: Option<String>,
    },
}

async fn edit_user(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Json(op): Json<EditUserInput>,
) -> Result<Json<api::User>, EditUserError> {
    use EditUserError as E;
    use EditUserInput as Op;

    let mut my = state
        .db_client
        .get_user_by_id(auth_claims.user_id)
        .await?
        .ok_or(E::UserNotFound)?;

    match op {
        Op::SetAvailability {
            availability,
            message,
        } => {
            my.availability = availability;
            my.availability_message = message;

            state
                .db_client
                .update_user_availability(
                    my.id,
                    my.availability,
                    my.availability_message.as_deref(),
                )
                .await?;
        }
    }

    Ok(Json(my.into()))
}

#[derive(Debug, From)]
pub enum EditUserError {
    #[from]
    DbError(db::Error),
    UserNotFound,
}

impl IntoResponse for EditUserError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(_) | Self::UserNotFound => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
        .into_response()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueTicketInput {
    service_id: db::service::Id,
    ticket_type_id: db::ticket_type::Id,
}

async fn issue_ticket(
    State(state): State<SharedAppState>,
    Json(IssueTicketInput {
        service_id,
        ticket_type_id,
    }): Json<IssueTicketInput>,
) -> Result<Json<api::Ticket>, IssueTicketError> {
    use IssueTicketError as E;

    let service = state
        .db_client
        .get_service_by_id(service_id)
        .await?
        .ok_or(E::ServiceNotFound)?;
    let ticket_type = state
        .db_client
        .get_ticket_type_by_id(ticket_type_id)
        .await?
        .ok_or(E::TicketTypeNotFound)?;

    let now = OffsetDateTime::now_utc();
    let number = state
        .db_client
        .allocate_number(&ticket_type.prefix, now)
        .await?;

    let ticket = db::Ticket {
        id: db::ticket::Id::new(),
        number,
        service: service.id,
        service_name: service.name,
        status: db::ticket::Status::Waiting,
        // Frozen at issuance: later ticket-type edits never reorder
        // already-queued visitors.
        priority_weight: ticket_type.priority_weight,
        counter: None,
        clerk: None,
        created_at: now,
        called_at: None,
        finished_at: None,
        notes: None,
        tags: Vec::new(),
    };

    state.db_client.insert_ticket(&ticket).await?;

    Ok(Json(ticket.into()))
}

#[derive(Debug, From)]
pub enum IssueTicketError {
    #[from]
    DbError(db::Error),
    ServiceNotFound,
    TicketTypeNotFound,
}

impl IntoResponse for IssueTicketError {
    fn into_response(self) -> Response {
        match self {
            Self::ServiceNotFound | Self::TicketTypeNotFound => {
                StatusCode::BAD_REQUEST
            }
            Self::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
        .into_response()
    }
}

async fn list_waiting_tickets(
    State(state): State<SharedAppState>,
) -> Result<Json<api::ticket::List>, ListWaitingTicketsError> {
    let tickets_fut = state.db_client.get_waiting_tickets();
    let total_count_fut = state.db_client.get_waiting_count();
    let (tickets, total_count) =
        tokio::try_join!(tickets_fut, total_count_fut)?;

    Ok(Json(api::ticket::List {
        tickets: tickets.into_iter().map(Into::into).collect(),
        total_count,
    }))
}

#[derive(Debug, From)]
pub enum ListWaitingTicketsError {
    #[from]
    DbError(db::Error),
}

impl IntoResponse for ListWaitingTicketsError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
        .into_response()
    }
}

async fn get_ticket(
    State(state): State<SharedAppState>,
    Path(id): Path<api::ticket::Id>,
) -> Result<Json<api::Ticket>, GetTicketError> {
    use GetTicketError as E;

    let ticket = state
        .db_client
        .get_ticket_by_id(id)
        .await?
        .ok_or(E::TicketNotFound)?;

    Ok(Json(ticket.into()))
}

#[derive(Debug, From)]
pub enum GetTicketError {
    #[from]
    DbError(db::Error),
    TicketNotFound,
}

impl IntoResponse for GetTicketError {
    fn into_response(self) -> Response {
        match self {
            Self::TicketNotFound => StatusCode::NOT_FOUND,
            Self::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
        .into_response()
    }
}

async fn claim_next(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
) -> Result<Json<api::Ticket>, ClaimNextError> {
    use ClaimNextError as E;

    let clerk = state
        .db_client
        .get_user_by_id(auth_claims.user_id)
        .await?
        .ok_or(E::UserNotFound)?;
    if clerk.availability == api::user::Availability::Away {
        return Err(E::ClerkAway);
    }
    let counter_id = clerk.counter.ok_or(E::NoCounterAssigned)?;
    let counter = state
        .db_client
        .get_counter_by_id(counter_id)
        .await?
        .ok_or(E::CounterNotFound)?;

    if state
        .db_client
        .get_active_ticket_by_clerk(clerk.id)
        .await?
        .is_some()
    {
        return Err(E::AnotherTicketInProgress);
    }

    let services = state
        .db_client
        .get_services_for_counter(counter.id)
        .await?;
    let servable = dispatch::servable_set(&services);

    loop {
        let waiting = state.db_client.get_waiting_tickets().await?;
        let Some(next) = dispatch::select_next(&waiting, &servable) else {
            return Err(E::NoTicketWaiting);
        };

        let called_at = OffsetDateTime::now_utc();
        let claimed = state
            .db_client
            .claim_ticket(next.id, counter.id, clerk.id, called_at)
            .await?;
        if !claimed {
            // Someone else claimed it between the snapshot and the
            // update. Re-run selection on a fresh snapshot.
            continue;
        }

        let mut ticket = next.clone();
        ticket.status = db::ticket::Status::InProgress;
        ticket.counter = Some(counter.id);
        ticket.clerk = Some(clerk.id);
        ticket.called_at = Some(called_at);

        if let Some(event) = notify::CallEvent::from_ticket(&ticket) {
            state.bus.publish(event);
        }

        return Ok(Json(ticket.into()));
    }
}

#[derive(Debug, From)]
pub enum ClaimNextError {
    #[from]
    DbError(db::Error),
    AnotherTicketInProgress,
    ClerkAway,
    CounterNotFound,
    NoCounterAssigned,
    NoTicketWaiting,
    UserNotFound,
}

impl IntoResponse for ClaimNextError {
    fn into_response(self) -> Response {
        match self {
            Self::AnotherTicketInProgress
            | Self::ClerkAway
            | Self::NoCounterAssigned => StatusCode::BAD_REQUEST,
            Self::NoTicketWaiting => StatusCode::NOT_FOUND,
            Self::DbError(_) | Self::CounterNotFound | Self::UserNotFound => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
        .into_response()
    }
}

#[derive(Deserialize)]
#[serde(content = "data", rename_all = "camelCase", tag = "op")]
enum EditTicketInput {
    Finalize { notes: String, tags: Vec<String> },
    Recall,
}

async fn edit_ticket(
    State(state): State<SharedAppState>,
    _: AuthClaims,
    Path(id): Path<api::ticket::Id>,
    Json(op): Json<EditTicketInput>,
) -> Result<Response, EditTicketError> {
    use EditTicketError as E;
    use EditTicketInput as Op;

    let mut ticket = state
        .db_client
        .get_ticket_by_id(id)
        .await?
        .ok_or(E::TicketNotFound)?;

    match op {
        Op::Finalize { notes, tags } => {
            if !ticket.status.finalizable() {
                return Err(E::TicketCannotBeFinalized);
            }

            let tags = tags
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>();

            let finished_at = OffsetDateTime::now_utc();
            let finalized = state
                .db_client
                .finalize_ticket(ticket.id, &notes, &tags, finished_at)
                .await?;
            if !finalized {
                // The conditional update lost against a concurrent
                // transition; nothing was changed.
                return Err(E::TicketCannotBeFinalized);
            }

            ticket.status = db::ticket::Status::Finished;
            ticket.notes = Some(notes);
            ticket.tags = tags;
            ticket.finished_at = Some(finished_at);

            Ok(Json(api::Ticket::from(ticket)).into_response())
        }
        Op::Recall => {
            // Re-announcing only re-emits the notification; the stored
            // ticket is left untouched.
            if !ticket.status.finalizable() {
                return Err(E::TicketCannotBeRecalled);
            }
            let event = notify::CallEvent::from_ticket(&ticket)
                .ok_or(E::TicketCannotBeRecalled)?;

            state.bus.publish(event.clone());

            Ok(Json(event).into_response())
        }
    }
}

#[derive(Debug, From)]
pub enum EditTicketError {
    #[from]
    DbError(db::Error),
    TicketCannotBeFinalized,
    TicketCannotBeRecalled,
    TicketNotFound,
}

impl IntoResponse for EditTicketError {
    fn into_response(self) -> Response {
        match self {
            Self::TicketCannotBeFinalized | Self::TicketCannotBeRecalled => {
                StatusCode::BAD_REQUEST
            }
            Self::TicketNotFound => StatusCode::NOT_FOUND,
            Self::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
        .into_response()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResetQueueOutput {
    cancelled_count: u64,
}

async fn reset_queue(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
) -> Result<Json<ResetQueueOutput>, ResetQueueError> {
    use ResetQueueError as E;

    let my = state
        .db_client
        .get_user_by_id(auth_claims.user_id)
        .await?
        .ok_or(E::UserNotFound)?;
    if my.role != api::user::Role::Admin {
        return Err(E::NotAllowed);
    }

    let cancelled_count = state.db_client.cancel_active_tickets().await?;

    Ok(Json(ResetQueueOutput { cancelled_count }))
}

#[derive(Debug, From)]
pub enum ResetQueueError {
    #[from]
    DbError(db::Error),
    NotAllowed,
    UserNotFound,
}

impl IntoResponse for ResetQueueError {
    fn into_response(self) -> Response {
        match self {
            Self::NotAllowed => StatusCode::FORBIDDEN,
            Self::DbError(_) | Self::UserNotFound => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
        .into_response()
    }
}

#[derive(Deserialize)]
struct ListCallsInput {
    limit: Option<usize>,
}

/// Polling fallback for observers that do not share this process:
/// returns the most recent call events, newest first. Polling this
/// endpoint alone is sufficient to render a correct display.
async fn list_calls(
    State(state): State<SharedAppState>,
    Query(ListCallsInput { limit }): Query<ListCallsInput>,
) -> Result<Json<Vec<notify::CallEvent>>, ListCallsError> {
    let limit = limit.unwrap_or(state.call_history_size);

    let calls = state
        .db_client
        .get_last_called(limit)
        .await?
        .iter()
        .filter_map(notify::CallEvent::from_ticket)
        .collect::<Vec<_>>();

    Ok(Json(calls))
}

#[derive(Debug, From)]
pub enum ListCallsError {
    #[from]
    DbError(db::Error),
}

impl IntoResponse for ListCallsError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
        .into_response()
    }
}

/// In-process subscription to call events over SSE. Delivery is
/// best-effort on top of the polling fallback, never instead of it.
async fn subscribe_calls(
    State(state): State<SharedAppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, axum::Error>>> {
    let rx = state.bus.subscribe();
    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    return Some((SseEvent::default().json_data(&event), rx))
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

const METRICS_WINDOW_DAYS: u16 = 7;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetMetricsInput {
    #[serde(default, with = "time::serde::rfc3339::option")]
    from: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    to: Option<OffsetDateTime>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GetMetricsOutput {
    snapshot: metrics::Snapshot,
    clerks: Vec<metrics::LiveClerkState>,
    performance: Vec<metrics::ClerkPerformance>,
}

async fn get_metrics(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Query(GetMetricsInput { from, to }): Query<GetMetricsInput>,
) -> Result<Json<GetMetricsOutput>, GetMetricsError> {
    use GetMetricsError as E;

    let my = state
        .db_client
        .get_user_by_id(auth_claims.user_id)
        .await?
        .ok_or(E::UserNotFound)?;
    if my.role != api::user::Role::Admin {
        return Err(E::NotAllowed);
    }

    let now = OffsetDateTime::now_utc();
    let window_start = db::ticket::start_of_day(now)
        - time::Duration::days(i64::from(METRICS_WINDOW_DAYS) - 1);

    let window_fut =
        state.db_client.get_tickets_created_between(window_start, now);
    let waiting_fut = state.db_client.get_waiting_count();
    let attending_fut = state.db_client.get_attending_users();
    let in_progress_fut = state.db_client.get_in_progress_tickets();
    let (window, waiting_now, attending, in_progress) = tokio::try_join!(
        window_fut,
        waiting_fut,
        attending_fut,
        in_progress_fut
    )?;

    let snapshot =
        metrics::snapshot(&window, waiting_now, now, METRICS_WINDOW_DAYS);
    let clerks = metrics::live_clerk_states(&attending, &in_progress);

    let from = from.unwrap_or_else(|| db::ticket::start_of_day(now));
    let to = to.unwrap_or(now);
    let finished = state
        .db_client
        .get_tickets_finished_between(from, to)
        .await?;
    let clerk_ids = finished
        .iter()
        .filter_map(|t| t.clerk)
        .unique()
        .collect::<Vec<_>>();
    let users = state.db_client.get_users_by_ids(&clerk_ids).await?;
    let performance = metrics::clerk_performance(&finished, &users);

    Ok(Json(GetMetricsOutput {
        snapshot,
        clerks,
        performance,
    }))
}

#[derive(Debug, From)]
pub enum GetMetricsError {
    #[from]
    DbError(db::Error),
    NotAllowed,
    UserNotFound,
}

impl IntoResponse for GetMetricsError {
    fn into_response(self) -> Response {
        match self {
            Self::NotAllowed => StatusCode::FORBIDDEN,
            Self::DbError(_) | Self::UserNotFound => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
        .into_response()
    }
}

type SharedAppState = Arc<AppState>;

struct AppState {
    db_client: Arc<db::Client>,

    bus: notify::Bus,

    call_history_size: usize,

    jwt_expiration_time: Duration,

    jwt_decoding_key: DecodingKey,

    jwt_encoding_key: EncodingKey,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct AuthClaims {
    user_id: api::user::Id,
    exp: i64,
}

#[async_trait]
impl FromRequestParts<SharedAppState> for AuthClaims {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut request::Parts,
        state: &SharedAppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AuthError::InvalidToken)?;
        let token_data = decode::<Self>(
            bearer.token(),
            &state.jwt_decoding_key,
            &Validation::default(),
        )
        .map_err(|_| AuthError::InvalidToken)?;

        Ok(token_data.claims)
    }
}
