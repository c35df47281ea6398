#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Unauthenticated entry point.
    Login,
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}
