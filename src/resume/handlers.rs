use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    api::{store_rejection, ApiError},
    auth::extractors::AuthUser,
    state::AppState,
    store::{
        Employment, EmploymentFilter, EntityFilter, Hobby, HobbyFilter, NewEmployment, NewNamed,
        NewProfile, NewProject, Profile, ProfileFilter, Project, ProjectFilter, TechStack,
        TechStackFilter, User,
    },
};

use super::dto::{
    AttachStackRequest, Attached, CreateEmploymentRequest, CreateNamedRequest,
    CreateProfileRequest, CreateProjectRequest,
};

type Params = Query<HashMap<String, String>>;

// --- public routers ---

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/profiles", get(list_profiles))
        .route("/projects", get(list_projects))
        .route("/projects/:id/stacks", get(project_stacks))
        .route("/employments", get(list_employments))
        .route("/employments/:id/stacks", get(employment_stacks))
        .route("/hobbies", get(list_hobbies))
        .route("/tech-stacks", get(list_tech_stacks))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/profiles", post(create_profile))
        .route("/profiles/:id", delete(delete_profile))
        .route("/projects", post(create_project))
        .route("/projects/:id", delete(delete_project))
        .route("/projects/:id/stacks", post(attach_project_stack))
        .route("/employments", post(create_employment))
        .route("/employments/:id", delete(delete_employment))
        .route("/employments/:id/stacks", post(attach_employment_stack))
        .route("/hobbies", post(create_hobby))
        .route("/hobbies/:id", delete(delete_hobby))
        .route("/tech-stacks", post(create_tech_stack))
        .route("/tech-stacks/:id", delete(delete_tech_stack))
}

// --- helpers ---

fn bad_request(msg: &str) -> ApiError {
    warn!(msg, "invalid request body");
    (StatusCode::BAD_REQUEST, msg.to_string())
}

fn required(field: &str, value: &str) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(bad_request(&format!("{field} is required")));
    }
    Ok(value.to_string())
}

/// Rows owned by someone else are reported as missing.
fn ensure_owner(owner: Option<i64>, caller: &User, entity: &str, id: i64) -> Result<(), ApiError> {
    match owner {
        Some(owner) if owner == caller.id => Ok(()),
        Some(_) => {
            warn!(caller = caller.id, entity, id, "write on a row owned by another user");
            Err((StatusCode::NOT_FOUND, format!("{entity} not found: {id}")))
        }
        None => Err((StatusCode::NOT_FOUND, format!("{entity} not found: {id}"))),
    }
}

async fn project_owner(state: &AppState, id: i64) -> Result<Option<i64>, ApiError> {
    let filter = ProjectFilter {
        id: Some(id),
        ..Default::default()
    };
    let rows = state.store.get_projects(&filter).await.map_err(store_rejection)?;
    Ok(rows.first().map(|r| r.user_id))
}

async fn employment_owner(state: &AppState, id: i64) -> Result<Option<i64>, ApiError> {
    let filter = EmploymentFilter {
        id: Some(id),
        ..Default::default()
    };
    let rows = state.store.get_employments(&filter).await.map_err(store_rejection)?;
    Ok(rows.first().map(|r| r.user_id))
}

async fn tech_stack_owner(state: &AppState, id: i64) -> Result<Option<i64>, ApiError> {
    let filter = TechStackFilter {
        id: Some(id),
        ..Default::default()
    };
    let rows = state.store.get_tech_stacks(&filter).await.map_err(store_rejection)?;
    Ok(rows.first().map(|r| r.user_id))
}

// --- profiles ---

#[instrument(skip(state))]
pub async fn list_profiles(
    State(state): State<AppState>,
    Query(params): Params,
) -> Result<Json<Vec<Profile>>, ApiError> {
    let filter = ProfileFilter::from_params(&params).map_err(store_rejection)?;
    let rows = state.store.get_profiles(&filter).await.map_err(store_rejection)?;
    Ok(Json(rows))
}

#[instrument(skip(state, user, body), fields(user_id = user.id))]
pub async fn create_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreateProfileRequest>,
) -> Result<(StatusCode, Json<Profile>), ApiError> {
    let profile = state
        .store
        .create_profile(NewProfile {
            user_id: user.id,
            role: required("role", &body.role)?,
            about: body.about,
        })
        .await
        .map_err(store_rejection)?;
    info!(profile_id = profile.id, "profile created");
    Ok((StatusCode::CREATED, Json(profile)))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn delete_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let filter = ProfileFilter {
        id: Some(id),
        ..Default::default()
    };
    let owner = state
        .store
        .get_profiles(&filter)
        .await
        .map_err(store_rejection)?
        .first()
        .map(|p| p.user_id);
    ensure_owner(owner, &user, "profile", id)?;
    state.store.delete_profile(id).await.map_err(store_rejection)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- projects ---

/// `stack=<name>` also returns projects tagged with that tech stack.
#[instrument(skip(state))]
pub async fn list_projects(
    State(state): State<AppState>,
    Query(params): Params,
) -> Result<Json<Vec<Project>>, ApiError> {
    let filter = ProjectFilter::from_params(&params).map_err(store_rejection)?;
    let rows = state.store.get_projects(&filter).await.map_err(store_rejection)?;
    Ok(Json(rows))
}

#[instrument(skip(state, user, body), fields(user_id = user.id))]
pub async fn create_project(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    if body.end_date.is_some_and(|end| end < body.start_date) {
        return Err(bad_request("end_date is before start_date"));
    }
    let project = state
        .store
        .create_project(NewProject {
            user_id: user.id,
            name: required("name", &body.name)?,
            start_date: body.start_date,
            end_date: body.end_date,
            status: body.status,
            github: body.github,
            prod_link: body.prod_link,
            description: body.description,
        })
        .await
        .map_err(store_rejection)?;
    info!(project_id = project.id, "project created");
    Ok((StatusCode::CREATED, Json(project)))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn delete_project(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    ensure_owner(project_owner(&state, id).await?, &user, "project", id)?;
    state.store.delete_project(id).await.map_err(store_rejection)?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, user, body), fields(user_id = user.id))]
pub async fn attach_project_stack(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<AttachStackRequest>,
) -> Result<(StatusCode, Json<Attached>), ApiError> {
    ensure_owner(project_owner(&state, id).await?, &user, "project", id)?;
    let stack = body.tech_stack_id;
    ensure_owner(tech_stack_owner(&state, stack).await?, &user, "tech stack", stack)?;
    state
        .store
        .add_tech_stack_to_project(stack, id)
        .await
        .map_err(store_rejection)?;
    Ok((
        StatusCode::CREATED,
        Json(Attached {
            tech_stack_id: stack,
            target_id: id,
        }),
    ))
}

pub async fn project_stacks(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<TechStack>>, ApiError> {
    let stacks = state
        .store
        .project_tech_stacks(id)
        .await
        .map_err(store_rejection)?;
    Ok(Json(stacks))
}

// --- employments ---

#[instrument(skip(state))]
pub async fn list_employments(
    State(state): State<AppState>,
    Query(params): Params,
) -> Result<Json<Vec<Employment>>, ApiError> {
    let filter = EmploymentFilter::from_params(&params).map_err(store_rejection)?;
    let rows = state
        .store
        .get_employments(&filter)
        .await
        .map_err(store_rejection)?;
    Ok(Json(rows))
}

#[instrument(skip(state, user, body), fields(user_id = user.id))]
pub async fn create_employment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreateEmploymentRequest>,
) -> Result<(StatusCode, Json<Employment>), ApiError> {
    if body.end_date.is_some_and(|end| end < body.start_date) {
        return Err(bad_request("end_date is before start_date"));
    }
    let employment = state
        .store
        .create_employment(NewEmployment {
            user_id: user.id,
            name: required("name", &body.name)?,
            employee: required("employee", &body.employee)?,
            start_date: body.start_date,
            end_date: body.end_date,
            status: body.status,
            prod_link: body.prod_link,
            description: body.description,
        })
        .await
        .map_err(store_rejection)?;
    info!(employment_id = employment.id, "employment created");
    Ok((StatusCode::CREATED, Json(employment)))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn delete_employment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    ensure_owner(employment_owner(&state, id).await?, &user, "employment", id)?;
    state
        .store
        .delete_employment(id)
        .await
        .map_err(store_rejection)?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, user, body), fields(user_id = user.id))]
pub async fn attach_employment_stack(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    Json(body): Json<AttachStackRequest>,
) -> Result<(StatusCode, Json<Attached>), ApiError> {
    ensure_owner(employment_owner(&state, id).await?, &user, "employment", id)?;
    let stack = body.tech_stack_id;
    ensure_owner(tech_stack_owner(&state, stack).await?, &user, "tech stack", stack)?;
    state
        .store
        .add_tech_stack_to_employment(stack, id)
        .await
        .map_err(store_rejection)?;
    Ok((
        StatusCode::CREATED,
        Json(Attached {
            tech_stack_id: stack,
            target_id: id,
        }),
    ))
}

pub async fn employment_stacks(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<TechStack>>, ApiError> {
    let stacks = state
        .store
        .employment_tech_stacks(id)
        .await
        .map_err(store_rejection)?;
    Ok(Json(stacks))
}

// --- hobbies & tech stacks ---

#[instrument(skip(state))]
pub async fn list_hobbies(
    State(state): State<AppState>,
    Query(params): Params,
) -> Result<Json<Vec<Hobby>>, ApiError> {
    let filter = HobbyFilter::from_params(&params).map_err(store_rejection)?;
    let rows = state.store.get_hobbies(&filter).await.map_err(store_rejection)?;
    Ok(Json(rows))
}

#[instrument(skip(state, user, body), fields(user_id = user.id))]
pub async fn create_hobby(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreateNamedRequest>,
) -> Result<(StatusCode, Json<Hobby>), ApiError> {
    let hobby = state
        .store
        .create_hobby(NewNamed {
            user_id: user.id,
            name: required("name", &body.name)?,
        })
        .await
        .map_err(store_rejection)?;
    Ok((StatusCode::CREATED, Json(hobby)))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn delete_hobby(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let filter = HobbyFilter {
        id: Some(id),
        ..Default::default()
    };
    let owner = state
        .store
        .get_hobbies(&filter)
        .await
        .map_err(store_rejection)?
        .first()
        .map(|h| h.user_id);
    ensure_owner(owner, &user, "hobby", id)?;
    state.store.delete_hobby(id).await.map_err(store_rejection)?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn list_tech_stacks(
    State(state): State<AppState>,
    Query(params): Params,
) -> Result<Json<Vec<TechStack>>, ApiError> {
    let filter = TechStackFilter::from_params(&params).map_err(store_rejection)?;
    let rows = state
        .store
        .get_tech_stacks(&filter)
        .await
        .map_err(store_rejection)?;
    Ok(Json(rows))
}

#[instrument(skip(state, user, body), fields(user_id = user.id))]
pub async fn create_tech_stack(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreateNamedRequest>,
) -> Result<(StatusCode, Json<TechStack>), ApiError> {
    let stack = state
        .store
        .create_tech_stack(NewNamed {
            user_id: user.id,
            name: required("name", &body.name)?,
        })
        .await
        .map_err(store_rejection)?;
    Ok((StatusCode::CREATED, Json(stack)))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn delete_tech_stack(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    ensure_owner(tech_stack_owner(&state, id).await?, &user, "tech stack", id)?;
    state
        .store
        .delete_tech_stack(id)
        .await
        .map_err(store_rejection)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::tests::registration;
    use time::macros::date;

    async fn user(state: &AppState, name: &str) -> User {
        state
            .sessions
            .register(registration(name, "secret123"))
            .await
            .unwrap()
    }

    fn project_body(name: &str) -> Json<CreateProjectRequest> {
        Json(CreateProjectRequest {
            name: name.into(),
            start_date: date!(2022 - 01 - 01),
            end_date: None,
            status: None,
            github: None,
            prod_link: None,
            description: String::new(),
        })
    }

    fn query(pairs: &[(&str, &str)]) -> Params {
        Query(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    async fn stack(state: &AppState, owner: &User, name: &str) -> TechStack {
        let (_, Json(stack)) = create_tech_stack(
            State(state.clone()),
            AuthUser(owner.clone()),
            Json(CreateNamedRequest { name: name.into() }),
        )
        .await
        .unwrap();
        stack
    }

    #[tokio::test]
    async fn tagged_project_is_found_by_stack() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;

        let (status, Json(p1)) =
            create_project(State(state.clone()), AuthUser(alice.clone()), project_body("P1"))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        let go = stack(&state, &alice, "Go").await;
        stack(&state, &alice, "Rust").await;

        attach_project_stack(
            State(state.clone()),
            AuthUser(alice.clone()),
            Path(p1.id),
            Json(AttachStackRequest { tech_stack_id: go.id }),
        )
        .await
        .unwrap();

        let Json(found) = list_projects(
            State(state.clone()),
            query(&[("stack", "Go"), ("username", "alice")]),
        )
        .await
        .unwrap();
        assert_eq!(found.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(), ["P1"]);

        let Json(none) = list_projects(
            State(state.clone()),
            query(&[("stack", "Rust"), ("username", "alice")]),
        )
        .await
        .unwrap();
        assert!(none.is_empty());

        let (status, _) = list_projects(State(state.clone()), query(&[("stack", "Zig")]))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);

        let Json(stacks) = project_stacks(State(state), Path(p1.id)).await.unwrap();
        assert_eq!(stacks, vec![go]);
    }

    #[tokio::test]
    async fn list_requires_a_valid_filter() {
        let state = AppState::fake();
        let (status, _) = list_hobbies(State(state.clone()), query(&[])).await.unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = list_projects(State(state), query(&[("id", "abc")]))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cannot_touch_another_users_rows() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;
        let bob = user(&state, "bob").await;

        let (_, Json(p1)) =
            create_project(State(state.clone()), AuthUser(alice.clone()), project_body("P1"))
                .await
                .unwrap();
        let bobs_stack = stack(&state, &bob, "Go").await;

        let (status, _) = delete_project(State(state.clone()), AuthUser(bob.clone()), Path(p1.id))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = attach_project_stack(
            State(state.clone()),
            AuthUser(alice.clone()),
            Path(p1.id),
            Json(AttachStackRequest {
                tech_stack_id: bobs_stack.id,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);

        let status = delete_project(State(state), AuthUser(alice), Path(p1.id))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn create_validates_body() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;

        let (status, _) =
            create_project(State(state.clone()), AuthUser(alice.clone()), project_body("  "))
                .await
                .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let body = CreateEmploymentRequest {
            name: "Acme".into(),
            employee: "Engineer".into(),
            start_date: date!(2022 - 01 - 01),
            end_date: Some(date!(2021 - 01 - 01)),
            status: None,
            prod_link: None,
            description: String::new(),
        };
        let (status, _) = create_employment(State(state), AuthUser(alice), Json(body))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn profiles_and_hobbies_roundtrip() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;

        let (_, Json(profile)) = create_profile(
            State(state.clone()),
            AuthUser(alice.clone()),
            Json(CreateProfileRequest {
                role: "Backend".into(),
                about: "Rust".into(),
            }),
        )
        .await
        .unwrap();
        let Json(found) = list_profiles(State(state.clone()), query(&[("username", "alice")]))
            .await
            .unwrap();
        assert_eq!(found, vec![profile.clone()]);

        let (_, Json(hobby)) = create_hobby(
            State(state.clone()),
            AuthUser(alice.clone()),
            Json(CreateNamedRequest { name: "chess".into() }),
        )
        .await
        .unwrap();
        delete_hobby(State(state.clone()), AuthUser(alice.clone()), Path(hobby.id))
            .await
            .unwrap();
        delete_profile(State(state.clone()), AuthUser(alice), Path(profile.id))
            .await
            .unwrap();
        let Json(left) = list_hobbies(State(state), query(&[("name", "chess")]))
            .await
            .unwrap();
        assert!(left.is_empty());
    }
}
