//! Services exposed through the pipeline.

mod ping;
mod users;

pub use ping::{PingMethod, PingRequest, PingResponse, PingService};
pub use users::{
    CreateUserRequest, DeleteUserRequest, DeleteUserResponse, GetUserRequest, ListUsersRequest,
    ListUsersResponse, MeRequest, MeResponse, UpdateUserRequest, User, UsersMethod, UsersService,
};
