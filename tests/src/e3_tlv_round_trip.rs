//! E3 -- TLV round trip: the SELECT FCI for a multi-level applet directory
//! parses into the expected tree shape and re-encodes to the identical
//! bytes.

#[cfg(test)]
mod tests {
    use gp_ota_apdu::TlvNode;

    #[test]
    fn select_fci_parses_nested_two_byte_tag_and_round_trips() {
        let input = hex::decode("6F1C840E315041592E5359532E4444463031A50ABF0C0761054F07A0000000041010").unwrap();

        let (root, consumed) = TlvNode::parse_one(&input).unwrap();
        assert_eq!(consumed, input.len());
        assert_eq!(root.tag, vec![0x6f]);
        assert_eq!(root.children.len(), 2);

        let df_name = &root.children[0];
        assert_eq!(df_name.tag, vec![0x84]);
        assert_eq!(df_name.value, b"1PAY.SYS.DDF01");

        let prop_templ = &root.children[1];
        assert_eq!(prop_templ.tag, vec![0xa5]);
        assert_eq!(prop_templ.children.len(), 1);

        let bf0c = &prop_templ.children[0];
        assert_eq!(bf0c.tag, vec![0xbf, 0x0c]);
        assert!(bf0c.constructed);
        assert_eq!(bf0c.children.len(), 1);

        let sixty_one = &bf0c.children[0];
        assert_eq!(sixty_one.tag, vec![0x61]);
        assert_eq!(sixty_one.children.len(), 1);

        let aid = &sixty_one.children[0];
        assert_eq!(aid.tag, vec![0x4f]);
        assert_eq!(aid.value, hex::decode("A0000000041010").unwrap());

        assert_eq!(root.encode(), input);
    }
}
