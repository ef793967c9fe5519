//! 房间游戏的领域模型：用户、登录码、房间与成员关系。
//!
//! 模型由 `redis-orm` 的派生宏声明，键前缀分别为 `user:`、`code:`、`room:`、
//! `user_code_ownership::` 与 `member::`。

pub mod rooms;
pub mod topics;
pub mod users;

pub use rooms::{Room, RoomRelations, Round, UsersRooms, new_round};
pub use users::{
    AnonymousUser, Code, CodeRelations, Principal, User, UserCodes, UserRelations, code_auth,
    load_user, new_name, new_sid,
};
