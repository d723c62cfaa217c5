use strata::Strata;

#[derive(Clone)]
pub struct AppState {
    pub engine: Strata,
}
