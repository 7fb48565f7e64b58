use diesel::prelude::*;

use crate::db::{
    schema::{permissions, role_permissions, roles, user_roles},
    DbConn,
};
use crate::error::MapResult;
use crate::util::get_uuid;
use crate::{db_run, error::Error};

/// §3 Data Model — Role. System roles cannot be deleted.
#[derive(Debug, Identifiable, Queryable, Selectable, Clone)]
#[diesel(table_name = roles)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub is_system: bool,
}

/// §3 Data Model — Permission, a (resource, action) pair.
#[derive(Debug, Identifiable, Queryable, Selectable, Clone)]
#[diesel(table_name = permissions)]
pub struct Permission {
    pub id: String,
    pub resource: String,
    pub action: String,
}

impl Permission {
    pub fn key(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }
}

#[derive(Insertable)]
#[diesel(table_name = roles)]
struct NewRole<'a> {
    id: &'a str,
    name: &'a str,
    display_name: &'a str,
    is_system: bool,
}

impl Role {
    pub fn new(name: &str, display_name: &str, is_system: bool) -> Self {
        Self {
            id: get_uuid(),
            name: name.to_string(),
            display_name: display_name.to_string(),
            is_system,
        }
    }

    pub async fn insert(&self, conn: &DbConn) -> Result<(), Error> {
        let new_role = NewRole {
            id: &self.id,
            name: &self.name,
            display_name: &self.display_name,
            is_system: self.is_system,
        };
        db_run! { conn:
            postgresql, sqlite {
                diesel::insert_into(roles::table).values(&new_role).execute(conn).map_res("Error inserting role").map(|_| ())
            }
        }
    }

    pub async fn find_by_name(name: &str, conn: &DbConn) -> Option<Self> {
        let name = name.to_string();
        db_run! { conn:
            postgresql, sqlite {
                roles::table.filter(roles::name.eq(name)).first::<Self>(conn).ok()
            }
        }
    }

    /// Every permission attached to every role the user holds, deduplicated
    /// by (resource, action) — this is the input to the RBAC stage of C9.
    pub async fn permissions_for_user(user_id: &str, conn: &DbConn) -> Result<Vec<Permission>, Error> {
        let user_id = user_id.to_string();
        db_run! { conn:
            postgresql, sqlite {
                permissions::table
                    .inner_join(role_permissions::table.on(role_permissions::permission_id.eq(permissions::id)))
                    .inner_join(user_roles::table.on(user_roles::role_id.eq(role_permissions::role_id)))
                    .filter(user_roles::user_id.eq(&user_id))
                    .select(Permission::as_select())
                    .distinct()
                    .load::<Permission>(conn)
                    .map_res("Error loading permissions for user")
            }
        }
    }

    pub async fn names_for_user(user_id: &str, conn: &DbConn) -> Result<Vec<String>, Error> {
        let user_id = user_id.to_string();
        db_run! { conn:
            postgresql, sqlite {
                roles::table
                    .inner_join(user_roles::table.on(user_roles::role_id.eq(roles::id)))
                    .filter(user_roles::user_id.eq(&user_id))
                    .select(roles::name)
                    .load::<String>(conn)
                    .map_res("Error loading role names for user")
            }
        }
    }

    pub async fn assign_to_user(role_id: &str, user_id: &str, conn: &DbConn) -> Result<(), Error> {
        let role_id = role_id.to_string();
        let user_id = user_id.to_string();
        db_run! { conn:
            postgresql, sqlite {
                diesel::insert_into(user_roles::table)
                    .values((user_roles::user_id.eq(&user_id), user_roles::role_id.eq(&role_id)))
                    .execute(conn)
                    .map_res("Error assigning role to user")
                    .map(|_| ())
            }
        }
    }
}
