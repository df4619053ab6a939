#![allow(unused_macros)]

macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().map_err(|_| crate::Error::LockError)?
    };
}

macro_rules! wait_while {
    ($condvar:expr, $guard:expr, $timeout:expr, $cond:expr) => {
        $condvar
            .wait_timeout_while($guard, $timeout, $cond)
            .map_err(|_| crate::Error::LockError)?
    };
}
