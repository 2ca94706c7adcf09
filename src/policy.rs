use crate::auth::Caller;

/// A caller may act on a group if they created it or carry the configured
/// administrator permission level. Pure decision — no side effects.
pub fn may_modify(caller: &Caller, owner_id: i64, admin_permission: i64) -> bool {
    caller.user_id == owner_id || is_admin(caller, admin_permission)
}

pub fn is_admin(caller: &Caller, admin_permission: i64) -> bool {
    caller.permission == admin_permission
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMIN: i64 = 5;

    fn caller(user_id: i64, permission: i64) -> Caller {
        Caller { user_id, permission }
    }

    #[test]
    fn owner_may_modify() {
        assert!(may_modify(&caller(7, 1), 7, ADMIN));
    }

    #[test]
    fn stranger_may_not_modify() {
        assert!(!may_modify(&caller(8, 1), 7, ADMIN));
    }

    #[test]
    fn admin_may_modify_anything() {
        assert!(may_modify(&caller(8, ADMIN), 7, ADMIN));
    }

    #[test]
    fn admin_check_is_exact_match() {
        assert!(is_admin(&caller(1, ADMIN), ADMIN));
        assert!(!is_admin(&caller(1, ADMIN + 1), ADMIN));
        assert!(!is_admin(&caller(1, 0), ADMIN));
    }
}
