use super::OutputModelController;
use crate::error::ModelError;
use crate::model::{ChangeOrigin, OutputModel};
use crate::protocol::{ContentUpdate, CursorUpdate, ScreenSnapshot};

/// Applies every backend event as it arrives. Used for the alternate screen,
/// where full-screen programs do their own echo.
#[derive(Debug)]
pub struct ImmediateController {
    model: OutputModel,
}

impl ImmediateController {
    pub fn new(model: OutputModel) -> Self {
        Self { model }
    }
}

impl OutputModelController for ImmediateController {
    fn model(&self) -> &OutputModel {
        &self.model
    }

    fn update_content(&mut self, update: ContentUpdate) -> Result<(), ModelError> {
        self.model.apply_content_update(&update, ChangeOrigin::Backend)
    }

    fn update_cursor(&mut self, update: CursorUpdate) {
        self.model.apply_cursor_update(update, ChangeOrigin::Backend);
    }

    fn restore(&mut self, snapshot: &ScreenSnapshot) {
        self.model.restore(snapshot);
    }

    fn apply_pending_updates(&mut self) -> Result<(), ModelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_updates_synchronously() {
        let mut controller = ImmediateController::new(OutputModel::new("alternate", 24));
        controller
            .update_content(ContentUpdate::new(0, "~\n~\n:q"))
            .expect("update");
        controller.update_cursor(CursorUpdate { line: 2, column: 2 });

        assert_eq!(controller.model().text(), "~\n~\n:q");
        assert_eq!(controller.model().cursor_offset(), 6);
        assert_eq!(controller.next_deadline(), None);
    }
}
