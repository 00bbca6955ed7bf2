cfg_epoll_selector! {
    mod epoll;
    pub(crate) use epoll::{Event, Events, Selector};
}

cfg_poll_selector! {
    mod poll_backend;
    pub(crate) use poll_backend::{Event, Events, Selector};
}
