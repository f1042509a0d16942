// Application state for HTTP handlers
use crate::application::widget_service::WidgetService;

#[derive(Clone)]
pub struct AppState {
    pub widget_service: WidgetService,
}
